//! Core authorization types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique policy identifier
pub type PolicyId = String;

/// Unique role identifier
pub type RoleId = String;

/// Unique user identifier
pub type UserId = String;

/// Unique realm (tenant) identifier
pub type RealmId = String;

/// Per-request attribute map consulted by condition operators.
///
/// Keys are colon-qualified (`user:id`, `user:realm_id`, ...) or verbatim
/// path and query parameter names.
pub type Context = HashMap<String, serde_json::Value>;

/// Well-known action atoms
pub mod actions {
    pub const CREATE: &str = "create";
    pub const READ: &str = "read";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    pub const MANAGE: &str = "manage";
    pub const APPROVE: &str = "approve";
    pub const REJECT: &str = "reject";
    pub const SUSPEND: &str = "suspend";
    pub const ACTIVATE: &str = "activate";
    pub const EXECUTE: &str = "execute";
    pub const EXPORT: &str = "export";
    pub const IMPORT: &str = "import";
    pub const BACKUP: &str = "backup";
    pub const RESTORE: &str = "restore";

    /// Sentinel that subsumes every concrete action
    pub const ALL: &str = "*";
}

/// Realm (tenant) namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Realm {
    pub id: RealmId,
    pub name: String,
}

/// Role visible inside one realm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub realm_id: RealmId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Registration status of a user account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Pending,
    Confirmed,
    Approved,
    Denied,
    Suspended,
}

/// Persisted user as seen by the principal resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub realm_id: RealmId,
    pub username: String,
    pub email: String,
    pub active: bool,
    pub status: UserStatus,
}

impl UserRecord {
    /// Only active, approved users may authenticate
    pub fn is_authenticable(&self) -> bool {
        self.active && self.status == UserStatus::Approved
    }
}

/// A single access request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub user_id: UserId,
    pub realm_id: RealmId,
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub context: Context,
}

impl AccessRequest {
    /// Create a request with an empty context
    pub fn new(
        user_id: impl Into<String>,
        realm_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            realm_id: realm_id.into(),
            action: action.into(),
            resource: resource.into(),
            context: Context::new(),
        }
    }

    /// Add a context attribute
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// An (action, resource) pair used by `check_any` / `check_all`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub action: String,
    pub resource: String,
}

impl Requirement {
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
        }
    }
}

impl<A: Into<String>, R: Into<String>> From<(A, R)> for Requirement {
    fn from((action, resource): (A, R)) -> Self {
        Self::new(action, resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_authenticable() {
        let mut user = UserRecord {
            id: "u1".into(),
            realm_id: "r1".into(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            active: true,
            status: UserStatus::Approved,
        };
        assert!(user.is_authenticable());

        user.status = UserStatus::Confirmed;
        assert!(!user.is_authenticable());

        user.status = UserStatus::Approved;
        user.active = false;
        assert!(!user.is_authenticable());
    }

    #[test]
    fn test_access_request_context() {
        let request = AccessRequest::new("u1", "r1", "read", "posts")
            .with_context("user:realm_id", "r1")
            .with_context("page", 2);

        assert_eq!(request.context.get("user:realm_id"), Some(&serde_json::json!("r1")));
        assert_eq!(request.context.get("page"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn test_requirement_from_tuple() {
        let req: Requirement = ("update", "tasks").into();
        assert_eq!(req, Requirement::new("update", "tasks"));
    }

    #[test]
    fn test_user_status_serde() {
        let status: UserStatus = serde_json::from_str("\"approved\"").unwrap();
        assert_eq!(status, UserStatus::Approved);
    }
}
