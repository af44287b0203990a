//! Decision Engine
//!
//! Composes the policy and permission evaluators into one decision per
//! (principal, action, resource, context), with optional cross-request
//! policy caching and metrics.

pub mod cache;
pub mod decision;
pub mod evaluation;
pub mod metrics;

pub use cache::{CacheConfig, CacheStats, PolicyCache, PolicyKey};
pub use decision::{reasons, Decision, DecisionSource, Provenance};
pub use evaluation::Evaluation;
pub use metrics::{EngineMetrics, MetricsCollector};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::permission::{PermissionEvaluator, PermissionStore, PermissionSummary};
use crate::policy::{PolicyEvaluator, PolicyStore};
use crate::principal::Principal;
use crate::types::{Context, Requirement};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Decision Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cache policy store reads across requests. Honored only when the
    /// policy store reports a write generation.
    pub enable_policy_cache: bool,

    /// Cache configuration
    pub cache_config: CacheConfig,

    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Allow `read` through a record whose level implies it
    pub read_fallback: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_policy_cache: false,
            cache_config: CacheConfig::default(),
            enable_metrics: true,
            read_fallback: true,
        }
    }
}

/// Authorization decision engine
///
/// ```text
/// check → PolicyEvaluator ──Deny/Allow──────────────→ Decision
///              │ no opinion
///              ↓
///         PermissionEvaluator ──Allow─────────────────→ Decision
///              │ no opinion
///              ↓
///         default deny ───────────────────────────────→ Decision
/// ```
///
/// The engine holds no per-request state and is shared across tasks.
pub struct DecisionEngine {
    policy_store: Arc<dyn PolicyStore>,

    permission_store: Arc<dyn PermissionStore>,

    policy_evaluator: PolicyEvaluator,

    permission_evaluator: PermissionEvaluator,

    /// Cross-request policy cache
    cache: Option<Arc<PolicyCache>>,

    metrics: Option<Arc<MetricsCollector>>,

    clock: Arc<dyn Clock>,

    config: EngineConfig,
}

impl DecisionEngine {
    pub fn new(
        config: EngineConfig,
        policy_store: Arc<dyn PolicyStore>,
        permission_store: Arc<dyn PermissionStore>,
    ) -> Self {
        let cache_supported = policy_store.generation().is_some();
        if config.enable_policy_cache && !cache_supported {
            warn!("Policy store does not report writes; cross-request policy cache disabled");
        }
        let cache = (config.enable_policy_cache && cache_supported)
            .then(|| Arc::new(PolicyCache::new(config.cache_config.clone())));

        let metrics = config
            .enable_metrics
            .then(|| Arc::new(MetricsCollector::new()));

        info!(
            "DecisionEngine initialized with policy_cache={}, metrics={}, read_fallback={}",
            cache.is_some(), config.enable_metrics, config.read_fallback
        );

        Self {
            policy_store,
            permission_store,
            policy_evaluator: PolicyEvaluator::new(),
            permission_evaluator: PermissionEvaluator::new(config.read_fallback),
            cache,
            metrics,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Use a different time source for expiry checks
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a metrics collector with other components
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a request-scoped evaluation bound to a cancellation signal
    pub fn evaluation(&self, cancel: CancellationToken) -> Evaluation<'_> {
        Evaluation::new(self, cancel)
    }

    /// Decide whether `principal` may perform `action` on `resource`.
    ///
    /// Store errors propagate; a decision is produced only when every read
    /// succeeded.
    pub async fn check(
        &self,
        principal: Option<&Principal>,
        action: &str,
        resource: &str,
        context: &Context,
    ) -> Result<Decision> {
        self.evaluation(CancellationToken::new())
            .check(principal, action, resource, context)
            .await
    }

    /// Allow on the first allowing pair
    pub async fn check_any(
        &self,
        principal: Option<&Principal>,
        requirements: &[Requirement],
        context: &Context,
    ) -> Result<Decision> {
        self.evaluation(CancellationToken::new())
            .check_any(principal, requirements, context)
            .await
    }

    /// Allow only if every pair allows
    pub async fn check_all(
        &self,
        principal: Option<&Principal>,
        requirements: &[Requirement],
        context: &Context,
    ) -> Result<Decision> {
        self.evaluation(CancellationToken::new())
            .check_all(principal, requirements, context)
            .await
    }

    /// Resources the principal can reach through permission records
    pub async fn summary(&self, principal: &Principal) -> Result<PermissionSummary> {
        self.evaluation(CancellationToken::new())
            .summary(principal)
            .await
    }

    /// Drop every cross-request cache entry. Store writes already retire
    /// entries through the generation; this also resets the statistics.
    pub fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            info!("Policy cache invalidated");
        }
    }

    pub async fn metrics(&self) -> Option<EngineMetrics> {
        match &self.metrics {
            Some(metrics) => Some(metrics.get_metrics().await),
            None => None,
        }
    }

    pub fn metrics_collector(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn test_engine_creation() {
        let store = Arc::new(InMemoryStore::new());
        let engine = DecisionEngine::new(EngineConfig::default(), store.clone(), store);

        assert!(engine.cache.is_none());
        assert!(engine.metrics.is_some());
        assert!(engine.cache_stats().is_none());
    }

    struct Unversioned(InMemoryStore);

    #[async_trait::async_trait]
    impl PolicyStore for Unversioned {
        async fn policies_for(
            &self,
            user_id: &str,
            realm_id: &str,
            resource: Option<&str>,
        ) -> std::result::Result<Vec<crate::policy::Policy>, crate::error::StoreError> {
            self.0.policies_for(user_id, realm_id, resource).await
        }

        async fn statements_of(
            &self,
            policy_id: &str,
        ) -> std::result::Result<Vec<crate::policy::Statement>, crate::error::StoreError> {
            self.0.statements_of(policy_id).await
        }
    }

    #[test]
    fn test_cache_needs_a_versioned_store() {
        let config = EngineConfig {
            enable_policy_cache: true,
            ..Default::default()
        };

        let store = Arc::new(InMemoryStore::new());
        let engine = DecisionEngine::new(config.clone(), store.clone(), store.clone());
        assert!(engine.cache_stats().is_some());

        let engine = DecisionEngine::new(config, Arc::new(Unversioned(InMemoryStore::new())), store);
        assert!(engine.cache_stats().is_none());
    }

    #[tokio::test]
    async fn test_anonymous_is_denied_without_store_reads() {
        let store = Arc::new(InMemoryStore::new());
        let engine = DecisionEngine::new(EngineConfig::default(), store.clone(), store);

        let decision = engine.check(None, "read", "posts", &Context::new()).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.source, DecisionSource::DefaultDeny);
        assert_eq!(decision.reason, reasons::ANONYMOUS);
    }

    #[tokio::test]
    async fn test_empty_requirement_lists_deny() {
        let store = Arc::new(InMemoryStore::new());
        let engine = DecisionEngine::new(EngineConfig::default(), store.clone(), store);

        let any = engine.check_any(None, &[], &Context::new()).await.unwrap();
        let all = engine.check_all(None, &[], &Context::new()).await.unwrap();
        assert_eq!(any.source, DecisionSource::DefaultDeny);
        assert_eq!(all.source, DecisionSource::DefaultDeny);
    }
}
