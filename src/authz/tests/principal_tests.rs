//! Principal Resolver integration tests

mod common;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use common::*;
use ed25519_dalek::SigningKey;
use realm_authz::context::{action_from_method, resource_from_path};
use realm_authz::types::{UserRecord, UserStatus};
use realm_authz::{
    ContextBuilder, DecisionEngine, DecisionSource, EngineConfig, FixedClock, InMemoryStore,
    PrincipalError, PrincipalResolver, ResolverConfig, StoreError, UserDirectory,
};
use realm_authz::permission::{PermissionLevel, PermissionRecord};
use serde_json::json;
use std::sync::Arc;

fn resolver() -> PrincipalResolver {
    PrincipalResolver::new(ResolverConfig::default(), verifying_key())
        .unwrap()
        .with_clock(Arc::new(FixedClock::new(now())))
}

fn resolver_with_store(store: Arc<InMemoryStore>) -> PrincipalResolver {
    resolver().with_directory(store)
}

async fn resolve_err(resolver: &PrincipalResolver, credential: &str) -> PrincipalError {
    resolver.resolve_principal(credential).await.unwrap_err()
}

fn with(mut claims: serde_json::Value, key: &str, value: serde_json::Value) -> serde_json::Value {
    claims[key] = value;
    claims
}

// ============================================================================
// CREDENTIAL VERIFICATION
// ============================================================================

#[tokio::test]
async fn test_valid_credential() {
    let principal = resolver().resolve_principal(&sign(&claims())).await.unwrap();

    assert_eq!(principal.user_id, USER);
    assert_eq!(principal.realm_id, REALM);
    assert_eq!(principal.username, "alice");
    assert_eq!(principal.email, "alice@example.com");
    assert_eq!(principal.roles, vec!["editor".to_string()]);
}

#[tokio::test]
async fn test_missing_and_malformed() {
    let resolver = resolver();

    assert_eq!(resolve_err(&resolver, "").await, PrincipalError::MissingCredential);
    assert_eq!(resolve_err(&resolver, "   ").await, PrincipalError::MissingCredential);
    for credential in ["abc", "a.b", "!!!.###.$$$", "a.b.c.d"] {
        assert_eq!(
            resolve_err(&resolver, credential).await.kind(),
            "malformed-credential",
            "credential {:?}",
            credential
        );
    }
}

#[tokio::test]
async fn test_bad_algorithm() {
    let credential = sign_with(&signing_key(), "HS256", &claims());
    assert_eq!(
        resolve_err(&resolver(), &credential).await,
        PrincipalError::BadAlgorithm("HS256".to_string())
    );
}

/// Tokens minted for other algorithms carry signatures of other lengths
#[tokio::test]
async fn test_bad_algorithm_with_foreign_signature_length() {
    let encode = |value: serde_json::Value| URL_SAFE_NO_PAD.encode(serde_json::to_vec(&value).unwrap());

    for (alg, len) in [("HS256", 32usize), ("RS256", 256), ("none", 0)] {
        let credential = format!(
            "{}.{}.{}",
            encode(json!({"alg": alg, "typ": "JWT"})),
            encode(claims()),
            URL_SAFE_NO_PAD.encode(vec![9u8; len])
        );
        let err = resolve_err(&resolver(), &credential).await;
        assert_eq!(err, PrincipalError::BadAlgorithm(alg.to_string()));
        assert_eq!(err.kind(), "bad-algorithm");
    }
}

#[tokio::test]
async fn test_bad_signature() {
    let other = SigningKey::from_bytes(&[42u8; 32]);
    let credential = sign_with(&other, "EdDSA", &claims());
    assert_eq!(resolve_err(&resolver(), &credential).await, PrincipalError::BadSignature);

    // Claims swapped after signing
    let original = sign(&claims());
    let forged = sign(&with(claims(), "user_id", json!("admin")));
    let mut parts: Vec<&str> = original.split('.').collect();
    let forged_claims = forged.split('.').nth(1).unwrap();
    parts[1] = forged_claims;
    assert_eq!(
        resolve_err(&resolver(), &parts.join(".")).await,
        PrincipalError::BadSignature
    );
}

#[tokio::test]
async fn test_validity_window() {
    let ts = now().timestamp();
    let resolver = resolver();

    let expired = sign(&with(claims(), "exp", json!(ts)));
    assert_eq!(resolve_err(&resolver, &expired).await, PrincipalError::ExpiredCredential);

    let future = sign(&with(claims(), "nbf", json!(ts + 60)));
    assert_eq!(resolve_err(&resolver, &future).await, PrincipalError::NotYetValid);

    let lenient = PrincipalResolver::new(
        ResolverConfig {
            leeway_secs: 120,
            ..Default::default()
        },
        verifying_key(),
    )
    .unwrap()
    .with_clock(Arc::new(FixedClock::new(now())));
    assert!(lenient.resolve_principal(&future).await.is_ok());
    assert!(lenient.resolve_principal(&expired).await.is_ok());
}

#[tokio::test]
async fn test_issuer_and_audience() {
    let resolver = resolver();

    let wrong_iss = sign(&with(claims(), "iss", json!("someone-else")));
    assert_eq!(resolve_err(&resolver, &wrong_iss).await, PrincipalError::WrongIssuer);

    let wrong_aud = sign(&with(claims(), "aud", json!("other-api")));
    assert_eq!(resolve_err(&resolver, &wrong_aud).await, PrincipalError::WrongAudience);

    let mut no_aud = claims();
    no_aud.as_object_mut().unwrap().remove("aud");
    assert_eq!(resolve_err(&resolver, &sign(&no_aud)).await, PrincipalError::WrongAudience);

    let many = sign(&with(claims(), "aud", json!(["other-api", "realm-api"])));
    assert!(resolver.resolve_principal(&many).await.is_ok());
}

#[tokio::test]
async fn test_key_rotation() {
    let resolver = resolver();
    let next = SigningKey::from_bytes(&[11u8; 32]);
    let credential = sign_with(&next, "EdDSA", &claims());

    assert_eq!(resolve_err(&resolver, &credential).await, PrincipalError::BadSignature);

    resolver.rotate_key(next.verifying_key());
    assert!(resolver.resolve_principal(&credential).await.is_ok());
    assert_eq!(resolve_err(&resolver, &sign(&claims())).await, PrincipalError::BadSignature);
}

#[test]
fn test_rejects_unsupported_algorithm_config() {
    let config = ResolverConfig {
        algorithm: "RS256".to_string(),
        ..Default::default()
    };
    assert!(PrincipalResolver::new(config, verifying_key()).is_err());
}

// ============================================================================
// USER DIRECTORY
// ============================================================================

#[tokio::test]
async fn test_unknown_and_inactive_users() {
    let store = Arc::new(base_store());
    store.insert_user(user("u-pending", true, UserStatus::Pending));
    store.insert_user(user("u-disabled", false, UserStatus::Approved));
    let resolver = resolver_with_store(store);

    assert!(resolver.resolve_principal(&sign(&claims())).await.is_ok());

    let unknown = sign(&with(claims(), "user_id", json!("u-ghost")));
    assert_eq!(resolve_err(&resolver, &unknown).await, PrincipalError::UnknownUser);

    for id in ["u-pending", "u-disabled"] {
        let credential = sign(&with(claims(), "user_id", json!(id)));
        assert_eq!(resolve_err(&resolver, &credential).await, PrincipalError::InactiveUser);
    }

    // A user of another realm is unknown here
    let foreign = sign(&with(claims(), "realm_id", json!("R2")));
    assert_eq!(resolve_err(&resolver, &foreign).await, PrincipalError::UnknownUser);
}

#[tokio::test]
async fn test_directory_check_can_be_disabled() {
    let resolver = PrincipalResolver::new(
        ResolverConfig {
            verify_user: false,
            ..Default::default()
        },
        verifying_key(),
    )
    .unwrap()
    .with_clock(Arc::new(FixedClock::new(now())))
    .with_directory(Arc::new(InMemoryStore::new()));

    assert!(resolver.resolve_principal(&sign(&claims())).await.is_ok());
}

struct BrokenDirectory;

#[async_trait]
impl UserDirectory for BrokenDirectory {
    async fn find_user(&self, _: &str, _: &str) -> Result<Option<UserRecord>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

#[tokio::test]
async fn test_directory_failure_is_a_store_error() {
    let resolver = resolver().with_directory(Arc::new(BrokenDirectory));

    let err = resolve_err(&resolver, &sign(&claims())).await;
    assert!(matches!(err, PrincipalError::Store(StoreError::Unavailable(_))));
    assert!(!err.is_credential_error());
    assert_eq!(err.kind(), "store-unavailable");

    // Optional mode still surfaces store failures
    let optional = resolver.resolve_optional(Some(&sign(&claims()))).await;
    assert!(matches!(optional, Err(PrincipalError::Store(_))));
}

// ============================================================================
// OPTIONAL MODE
// ============================================================================

#[tokio::test]
async fn test_optional_mode() {
    let resolver = resolver();

    assert_eq!(resolver.resolve_optional(None).await.unwrap(), None);
    assert_eq!(resolver.resolve_optional(Some("garbage")).await.unwrap(), None);

    let expired = sign(&with(claims(), "exp", json!(0)));
    assert_eq!(resolver.resolve_optional(Some(&expired)).await.unwrap(), None);

    let principal = resolver.resolve_optional(Some(&sign(&claims()))).await.unwrap();
    assert_eq!(principal.map(|p| p.user_id), Some(USER.to_string()));
}

// ============================================================================
// END TO END
// ============================================================================

#[tokio::test]
async fn test_credential_to_decision() {
    let store = Arc::new(base_store());
    store.insert_permission(
        PermissionRecord::for_user("perm-1", USER, REALM, "posts", PermissionLevel::Readwrite)
            .with_actions(["read", "create"]),
    );
    let resolver = resolver_with_store(store.clone());
    let engine = DecisionEngine::new(EngineConfig::default(), store.clone(), store)
        .with_clock(Arc::new(FixedClock::new(now())));

    let principal = resolver.resolve_principal(&sign(&claims())).await.unwrap();
    let path = "/api/v1/posts/42";
    let context = ContextBuilder::new()
        .principal(&principal)
        .path_params([("id", "42")])
        .request("POST", path)
        .build();

    assert_eq!(context.get("user:roles"), Some(&json!(["editor"])));
    assert_eq!(context.get("id"), Some(&json!("42")));

    let decision = engine
        .check(Some(&principal), action_from_method("POST"), &resource_from_path(path), &context)
        .await
        .unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.source, DecisionSource::UserPermission);

    let delete = engine
        .check(Some(&principal), action_from_method("DELETE"), &resource_from_path(path), &context)
        .await
        .unwrap();
    assert!(!delete.allowed);
}
