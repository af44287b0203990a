//! Authorization decision types

use crate::permission::{GrantSource, PermissionGrant, PermissionLevel};
use crate::policy::PolicyMatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Reason strings carried by decisions
pub mod reasons {
    pub const EXPLICIT_DENY: &str = "explicit-deny";
    pub const POLICY_ALLOW: &str = "policy-allow";
    pub const PERMISSION_GRANTED: &str = "permission-granted";
    pub const READ_FALLBACK: &str = "read-fallback";
    pub const NO_MATCH: &str = "no matching policy or permission";
    pub const PERMISSION_EXPIRED: &str = "permission expired";
    pub const ANONYMOUS: &str = "anonymous principal";
    pub const NO_REQUIREMENTS: &str = "no requirements given";
}

/// Which rule family produced the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionSource {
    UserPermission,
    RolePermission,
    Policy,
    DenyPolicy,
    DefaultDeny,
}

impl DecisionSource {
    pub const ALL: [DecisionSource; 5] = [
        DecisionSource::UserPermission,
        DecisionSource::RolePermission,
        DecisionSource::Policy,
        DecisionSource::DenyPolicy,
        DecisionSource::DefaultDeny,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionSource::UserPermission => "user-permission",
            DecisionSource::RolePermission => "role-permission",
            DecisionSource::Policy => "policy",
            DecisionSource::DenyPolicy => "deny-policy",
            DecisionSource::DefaultDeny => "default-deny",
        }
    }
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<GrantSource> for DecisionSource {
    fn from(source: GrantSource) -> Self {
        match source {
            GrantSource::User => DecisionSource::UserPermission,
            GrantSource::Role => DecisionSource::RolePermission,
        }
    }
}

/// What produced a decision; for server logs, never sent to clients
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub policy_id: Option<String>,
    pub statement_sid: Option<String>,
    pub record_id: Option<String>,
}

/// Authorization decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,

    pub source: DecisionSource,

    /// Level of the granting permission record
    pub level: Option<PermissionLevel>,

    pub effective_actions: BTreeSet<String>,

    /// When the granting record stops being live
    pub expires_at: Option<DateTime<Utc>>,

    /// Short reason, free of internal identifiers
    pub reason: String,

    #[serde(skip)]
    pub provenance: Option<Provenance>,
}

impl Decision {
    /// Deny from a matched Deny statement
    pub fn explicit_deny(matched: PolicyMatch) -> Self {
        Self {
            allowed: false,
            source: DecisionSource::DenyPolicy,
            level: None,
            effective_actions: BTreeSet::new(),
            expires_at: None,
            reason: reasons::EXPLICIT_DENY.to_string(),
            provenance: Some(Provenance::from(matched)),
        }
    }

    /// Allow from a matched Allow statement
    pub fn policy_allow(action: &str, matched: PolicyMatch) -> Self {
        Self {
            allowed: true,
            source: DecisionSource::Policy,
            level: None,
            effective_actions: BTreeSet::from([action.to_string()]),
            expires_at: None,
            reason: reasons::POLICY_ALLOW.to_string(),
            provenance: Some(Provenance::from(matched)),
        }
    }

    /// Allow from a permission record
    pub fn permission_allow(grant: PermissionGrant) -> Self {
        let reason = if grant.read_fallback {
            reasons::READ_FALLBACK
        } else {
            reasons::PERMISSION_GRANTED
        };

        Self {
            allowed: true,
            source: grant.source.into(),
            level: Some(grant.record.level),
            effective_actions: grant.effective_actions(),
            expires_at: grant.record.expires_at,
            reason: reason.to_string(),
            provenance: Some(Provenance {
                record_id: Some(grant.record.id),
                ..Default::default()
            }),
        }
    }

    /// Fallback deny when nothing allows
    pub fn default_deny(reason: &str) -> Self {
        Self {
            allowed: false,
            source: DecisionSource::DefaultDeny,
            level: None,
            effective_actions: BTreeSet::new(),
            expires_at: None,
            reason: reason.to_string(),
            provenance: None,
        }
    }

    /// `allow`, `deny-explicit` or `deny-default`
    pub fn outcome(&self) -> &'static str {
        match (self.allowed, self.source) {
            (true, _) => "allow",
            (false, DecisionSource::DenyPolicy) => "deny-explicit",
            (false, _) => "deny-default",
        }
    }
}

impl From<PolicyMatch> for Provenance {
    fn from(matched: PolicyMatch) -> Self {
        Self {
            policy_id: Some(matched.policy_id),
            statement_sid: Some(matched.statement_sid).filter(|sid| !sid.is_empty()),
            record_id: None,
        }
    }
}
