//! Flat permission records
//!
//! A [`PermissionRecord`] grants a user or role a set of actions on one
//! resource at a coarse [`PermissionLevel`], optionally conditioned and
//! time-limited.

use crate::error::StoreError;
use crate::policy::ConditionSet;
use crate::types::{actions, RealmId, RoleId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub mod evaluator;

pub use evaluator::{
    GrantSource, PermissionEvaluator, PermissionGrant, PermissionOutcome, PermissionSource,
    PermissionSummary, ResourceAccess,
};

/// Coarse permission classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Readonly,
    Readwrite,
    Full,
    /// Only the explicit action set applies
    Custom,
}

impl PermissionLevel {
    pub fn implies_read(self) -> bool {
        matches!(
            self,
            PermissionLevel::Readonly | PermissionLevel::Readwrite | PermissionLevel::Full
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionLevel::Readonly => "readonly",
            PermissionLevel::Readwrite => "readwrite",
            PermissionLevel::Full => "full",
            PermissionLevel::Custom => "custom",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readonly" => Ok(PermissionLevel::Readonly),
            "readwrite" => Ok(PermissionLevel::Readwrite),
            "full" => Ok(PermissionLevel::Full),
            "custom" => Ok(PermissionLevel::Custom),
            other => Err(StoreError::Corrupt(format!("unknown permission level '{}'", other))),
        }
    }
}

/// Who a record is granted to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum PermissionScope {
    User(UserId),
    Role(RoleId),
}

/// A direct grant of actions on one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub id: String,
    pub scope: PermissionScope,
    pub realm_id: RealmId,
    pub resource: String,
    #[serde(default)]
    pub actions: BTreeSet<String>,
    pub level: PermissionLevel,
    #[serde(default)]
    pub conditions: ConditionSet,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<UserId>,
    #[serde(default)]
    pub updated_by: Option<UserId>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl PermissionRecord {
    pub fn new(
        id: impl Into<String>,
        scope: PermissionScope,
        realm_id: impl Into<String>,
        resource: impl Into<String>,
        level: PermissionLevel,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            scope,
            realm_id: realm_id.into(),
            resource: resource.into(),
            actions: BTreeSet::new(),
            level,
            conditions: ConditionSet::default(),
            active: true,
            expires_at: None,
            created_by: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// User-scoped record
    pub fn for_user(
        id: impl Into<String>,
        user_id: impl Into<String>,
        realm_id: impl Into<String>,
        resource: impl Into<String>,
        level: PermissionLevel,
    ) -> Self {
        Self::new(id, PermissionScope::User(user_id.into()), realm_id, resource, level)
    }

    /// Role-scoped record
    pub fn for_role(
        id: impl Into<String>,
        role_id: impl Into<String>,
        realm_id: impl Into<String>,
        resource: impl Into<String>,
        level: PermissionLevel,
    ) -> Self {
        Self::new(id, PermissionScope::Role(role_id.into()), realm_id, resource, level)
    }

    pub fn with_actions<I>(mut self, actions: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_conditions(mut self, conditions: ConditionSet) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    /// Active and not yet expired
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired(now)
    }

    /// The explicit action set contains `action` or the `*` sentinel
    pub fn has_action(&self, action: &str) -> bool {
        self.actions.contains(action) || self.actions.contains(actions::ALL)
    }

    /// Parse the persisted JSON array of actions
    pub fn parse_actions(column: &str) -> Result<BTreeSet<String>, StoreError> {
        if column.trim().is_empty() {
            return Ok(BTreeSet::new());
        }
        serde_json::from_str::<Vec<String>>(column)
            .map(|list| list.into_iter().collect())
            .map_err(|e| StoreError::Corrupt(format!("invalid actions column: {}", e)))
    }
}

/// Read-only permission record store
///
/// Both lookups drop `active = false` records and leave expiry to the
/// evaluator. `resource: None` returns records for every resource.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Records scoped to the user
    async fn user_permissions(
        &self,
        user_id: &str,
        realm_id: &str,
        resource: Option<&str>,
    ) -> Result<Vec<PermissionRecord>, StoreError>;

    /// Records scoped to any role the user holds in the realm
    async fn role_permissions(
        &self,
        user_id: &str,
        realm_id: &str,
        resource: Option<&str>,
    ) -> Result<Vec<PermissionRecord>, StoreError>;
}
