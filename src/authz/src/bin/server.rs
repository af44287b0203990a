//! # Authorization HTTP Server
//!
//! Decision service for realm-scoped callers. Every endpoint except
//! `/health` and `/metrics` takes a bearer credential.
//!
//! ## Endpoints
//!
//! - `POST /v1/check` - Decision for one (action, resource) pair
//! - `POST /v1/authorize` - Same as `/v1/check`, 403 when denied
//! - `POST /v1/check-any` - Allow when any pair allows
//! - `POST /v1/check-all` - Allow only when every pair allows
//! - `GET /v1/permissions/summary` - Caller's permission summary
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics
//!
//! ## Configuration
//!
//! See [`realm_authz::AuthzConfig`]. `RUST_LOG` sets the log filter
//! (default: info).

use anyhow::Context as _;
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    serve, Router,
};
use chrono::{DateTime, Utc};
use realm_authz::engine::Decision;
use realm_authz::permission::{PermissionLevel, PermissionSummary};
use realm_authz::principal::bearer_token;
use realm_authz::{
    AuthzConfig, AuthzError, ContextBuilder, DecisionEngine, InMemoryStore, PermissionStore,
    PolicyStore, Principal, PrincipalError, PrincipalResolver, Requirement, StoreError,
    UserDirectory,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared application state
#[derive(Clone)]
struct AppState {
    engine: Arc<DecisionEngine>,
    resolver: Arc<PrincipalResolver>,
    start_time: std::time::Instant,
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Application error type
#[derive(Debug)]
enum AppError {
    Unauthorized(PrincipalError),
    Forbidden(CheckResponse),
    BadRequest(String),
    Unavailable,
    Internal,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            AppError::Forbidden(decision) => {
                return (StatusCode::FORBIDDEN, Json(decision)).into_response();
            }
            AppError::Unauthorized(err) => (
                StatusCode::UNAUTHORIZED,
                err.kind(),
                "credential rejected".to_string(),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                "authorization backend unavailable".to_string(),
            ),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "authorization failed".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<AuthzError> for AppError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Store(StoreError::Unavailable(_)) | AuthzError::Cancelled => AppError::Unavailable,
            AuthzError::InvalidRequest(msg) => AppError::BadRequest(msg),
            AuthzError::Store(_) | AuthzError::Config(_) => AppError::Internal,
        }
    }
}

impl From<PrincipalError> for AppError {
    fn from(err: PrincipalError) -> Self {
        match err {
            PrincipalError::Store(e) => AuthzError::Store(e).into(),
            e => AppError::Unauthorized(e),
        }
    }
}

/// Single pair check request
#[derive(Debug, Deserialize)]
struct CheckRequest {
    action: String,
    resource: String,
    #[serde(default)]
    context: HashMap<String, serde_json::Value>,
}

/// Multi pair check request
#[derive(Debug, Deserialize)]
struct BatchRequest {
    checks: Vec<Requirement>,
    #[serde(default)]
    context: HashMap<String, serde_json::Value>,
}

/// Decision as sent to clients
#[derive(Debug, Serialize)]
struct CheckResponse {
    allowed: bool,
    decision: String,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    level: Option<PermissionLevel>,
    effective_actions: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    reason: String,
}

impl From<Decision> for CheckResponse {
    fn from(decision: Decision) -> Self {
        Self {
            allowed: decision.allowed,
            decision: decision.outcome().to_string(),
            source: decision.source.to_string(),
            level: decision.level,
            effective_actions: decision.effective_actions,
            expires_at: decision.expires_at,
            reason: decision.reason,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    version: String,
}

/// Metrics response (Prometheus format)
struct MetricsResponse {
    metrics: String,
}

impl IntoResponse for MetricsResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            self.metrics,
        )
            .into_response()
    }
}

/// Resolve the caller from the `Authorization` header
async fn caller(state: &AppState, headers: &HeaderMap) -> Result<Principal, AppError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(PrincipalError::MissingCredential)?
        .to_str()
        .map_err(|e| PrincipalError::MalformedCredential(e.to_string()))?;

    let credential = bearer_token(header)?;
    Ok(state.resolver.resolve_principal(credential).await?)
}

fn request_context(principal: &Principal, extra: HashMap<String, serde_json::Value>) -> realm_authz::Context {
    extra
        .into_iter()
        .fold(ContextBuilder::new(), |builder, (key, value)| builder.insert(key, value))
        .principal(principal)
        .build()
}

/// Cancels the evaluation when the handler future is dropped
fn request_token() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    (cancel, guard)
}

async fn decide(state: &AppState, headers: &HeaderMap, req: CheckRequest) -> Result<CheckResponse, AppError> {
    let principal = caller(state, headers).await?;
    let context = request_context(&principal, req.context);

    let (cancel, _guard) = request_token();
    let decision = state
        .engine
        .evaluation(cancel)
        .check(Some(&principal), &req.action, &req.resource, &context)
        .await?;

    Ok(decision.into())
}

/// POST /v1/check - Decision for one pair
async fn check_authorization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, AppError> {
    Ok(Json(decide(&state, &headers, req).await?))
}

/// POST /v1/authorize - Decision for one pair, 403 when denied
async fn authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, AppError> {
    let response = decide(&state, &headers, req).await?;
    if !response.allowed {
        return Err(AppError::Forbidden(response));
    }
    Ok(Json(response))
}

/// POST /v1/check-any
async fn check_any(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BatchRequest>,
) -> Result<Json<CheckResponse>, AppError> {
    let principal = caller(&state, &headers).await?;
    let context = request_context(&principal, req.context);

    let (cancel, _guard) = request_token();
    let decision = state
        .engine
        .evaluation(cancel)
        .check_any(Some(&principal), &req.checks, &context)
        .await?;

    Ok(Json(decision.into()))
}

/// POST /v1/check-all
async fn check_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BatchRequest>,
) -> Result<Json<CheckResponse>, AppError> {
    let principal = caller(&state, &headers).await?;
    let context = request_context(&principal, req.context);

    let (cancel, _guard) = request_token();
    let decision = state
        .engine
        .evaluation(cancel)
        .check_all(Some(&principal), &req.checks, &context)
        .await?;

    Ok(Json(decision.into()))
}

/// GET /v1/permissions/summary
async fn permission_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PermissionSummary>, AppError> {
    let principal = caller(&state, &headers).await?;

    let (cancel, _guard) = request_token();
    let summary = state.engine.evaluation(cancel).summary(&principal).await?;

    Ok(Json(summary))
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: realm_authz::VERSION.to_string(),
    })
}

/// GET /metrics - Prometheus metrics endpoint
async fn metrics(State(state): State<AppState>) -> MetricsResponse {
    let mut metrics = format!(
        "# HELP authz_uptime_seconds Server uptime in seconds\n\
         # TYPE authz_uptime_seconds gauge\n\
         authz_uptime_seconds {}\n\
         \n\
         # HELP authz_version Server version info\n\
         # TYPE authz_version gauge\n\
         authz_version{{version=\"{}\"}} 1\n",
        state.start_time.elapsed().as_secs(),
        realm_authz::VERSION
    );

    if let Some(collector) = state.engine.metrics_collector() {
        metrics.push('\n');
        metrics.push_str(&collector.export_prometheus().await);
    }

    MetricsResponse { metrics }
}

/// Create the HTTP router with all endpoints
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/v1/check", post(check_authorization))
        .route("/v1/authorize", post(authorize))
        .route("/v1/check-any", post(check_any))
        .route("/v1/check-all", post(check_all))
        .route("/v1/permissions/summary", get(permission_summary))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(ServiceBuilder::new().layer(trace).layer(cors))
        .with_state(state)
}

fn build_state<S>(store: Arc<S>, config: &AuthzConfig) -> anyhow::Result<AppState>
where
    S: PolicyStore + PermissionStore + UserDirectory + 'static,
{
    let key = config.verifying_key().context("loading credential verification key")?;
    let resolver = PrincipalResolver::new(config.resolver.clone(), key)
        .context("configuring principal resolver")?
        .with_directory(store.clone());

    let engine = DecisionEngine::new(config.engine.clone(), store.clone(), store);

    Ok(AppState {
        engine: Arc::new(engine),
        resolver: Arc::new(resolver),
        start_time: std::time::Instant::now(),
    })
}

#[cfg(feature = "postgres")]
async fn open_postgres(config: &AuthzConfig) -> anyhow::Result<Option<AppState>> {
    let Some(url) = &config.database_url else {
        return Ok(None);
    };

    info!("Using PostgreSQL store");
    let store = realm_authz::store::PostgresStore::new(url)
        .await
        .context("connecting to PostgreSQL")?;
    build_state(Arc::new(store), config).map(Some)
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(config: &AuthzConfig) -> anyhow::Result<Option<AppState>> {
    if config.database_url.is_some() {
        warn!("DATABASE_URL is set but the postgres feature is disabled");
    }
    Ok(None)
}

async fn open_store(config: &AuthzConfig) -> anyhow::Result<AppState> {
    if let Some(state) = open_postgres(config).await? {
        return Ok(state);
    }

    let store = match &config.snapshot {
        Some(path) => {
            info!("Loading snapshot from {}", path.display());
            InMemoryStore::load_snapshot(path)
                .with_context(|| format!("loading snapshot {}", path.display()))?
        }
        None => {
            warn!("AUTHZ_SNAPSHOT not set, starting with an empty store");
            InMemoryStore::new()
        }
    };

    build_state(Arc::new(store), config)
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

/// Main server entrypoint
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Realm Authorization Server v{}", realm_authz::VERSION);

    let config = AuthzConfig::from_env();

    info!("Configuration:");
    info!("  Port: {}", config.port);
    info!("  Issuer: {}", config.resolver.issuer);
    info!("  Audience: {}", config.resolver.audience);
    info!("  Policy cache: {}", config.engine.enable_policy_cache);
    info!("  Read fallback: {}", config.engine.read_fallback);

    let state = open_store(&config).await?;
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server shut down gracefully");
    Ok(())
}
