//! Shared fixtures for integration tests

#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use realm_authz::policy::{ConditionSet, Effect};
use realm_authz::types::{Realm, Role, UserRecord, UserStatus};
use realm_authz::{InMemoryStore, Policy, Principal, Statement};
use serde_json::{json, Value};

pub const REALM: &str = "R1";
pub const USER: &str = "u1";
pub const EDITOR_ROLE: &str = "role-editor";

/// Fixed "now" used across suites
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

pub fn verifying_key() -> VerifyingKey {
    signing_key().verifying_key()
}

/// Sign a claim set as a compact JWS with the given `alg` header
pub fn sign_with(key: &SigningKey, alg: &str, claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&json!({"alg": alg, "typ": "JWT"})).unwrap());
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
    let signing_input = format!("{}.{}", header, payload);
    let signature = key.sign(signing_input.as_bytes());
    format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}

pub fn sign(claims: &Value) -> String {
    sign_with(&signing_key(), "EdDSA", claims)
}

/// Valid claims for `USER` in `REALM` at [`now`]
pub fn claims() -> Value {
    let now = now().timestamp();
    json!({
        "user_id": USER,
        "realm_id": REALM,
        "username": "alice",
        "email": "alice@example.com",
        "roles": ["editor"],
        "iss": "realm-authz",
        "aud": "realm-api",
        "iat": now - 60,
        "nbf": now - 60,
        "exp": now + 900,
    })
}

pub fn principal() -> Principal {
    Principal {
        user_id: USER.to_string(),
        realm_id: REALM.to_string(),
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
        roles: vec!["editor".to_string()],
    }
}

pub fn user(id: &str, active: bool, status: UserStatus) -> UserRecord {
    UserRecord {
        id: id.to_string(),
        realm_id: REALM.to_string(),
        username: id.to_string(),
        email: format!("{}@example.com", id),
        active,
        status,
    }
}

/// Realm `R1` with user `u1` holding the editor role, and no policies
pub fn base_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store.insert_realm(Realm {
        id: REALM.to_string(),
        name: "Realm One".to_string(),
    });
    store.insert_user(user(USER, true, UserStatus::Approved));
    store.insert_role(Role {
        id: EDITOR_ROLE.to_string(),
        realm_id: REALM.to_string(),
        name: "editor".to_string(),
        description: String::new(),
    });
    store.assign_role(USER, EDITOR_ROLE);
    store
}

/// Insert a single-statement policy
pub fn add_policy(
    store: &InMemoryStore,
    policy_id: &str,
    effect: Effect,
    actions: &[&str],
    resources: &[&str],
    conditions: Option<Value>,
) {
    store.insert_policy(Policy::new(policy_id, REALM, format!("{} policy", policy_id)));

    let mut statement = Statement::new(
        format!("{}-stmt", policy_id),
        policy_id,
        effect,
        actions.iter().copied(),
        resources.iter().copied(),
    )
    .unwrap()
    .with_sid(format!("{}Sid", policy_id));
    if let Some(conditions) = conditions {
        statement = statement.with_conditions(ConditionSet::from_json(conditions));
    }
    store.insert_statement(statement);
}
