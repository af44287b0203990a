//! Evaluation of an access request against flat permission records

use crate::error::Result;
use crate::permission::{PermissionLevel, PermissionRecord};
use crate::types::{actions, AccessRequest, RealmId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Where the evaluator reads permission records from
#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn user_records(
        &self,
        user_id: &str,
        realm_id: &str,
        resource: Option<&str>,
    ) -> Result<Vec<PermissionRecord>>;

    async fn role_records(
        &self,
        user_id: &str,
        realm_id: &str,
        resource: Option<&str>,
    ) -> Result<Vec<PermissionRecord>>;
}

/// Which record family granted access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantSource {
    User,
    Role,
}

/// A record that allowed the request
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionGrant {
    pub source: GrantSource,
    pub record: PermissionRecord,
    /// Allowed only through the level's implied read
    pub read_fallback: bool,
}

impl PermissionGrant {
    /// Explicit actions of the record, plus `read` on the fallback path
    pub fn effective_actions(&self) -> BTreeSet<String> {
        let mut effective = self.record.actions.clone();
        if self.read_fallback {
            effective.insert(actions::READ.to_string());
        }
        effective
    }
}

/// Result of permission evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionOutcome {
    Allow(PermissionGrant),
    NoOpinion {
        /// A record would have matched but had expired
        saw_expired: bool,
    },
}

/// Evaluates permission records: user records, then role records, then the
/// read fallback over both
#[derive(Debug, Clone, Copy)]
pub struct PermissionEvaluator {
    read_fallback: bool,
}

impl Default for PermissionEvaluator {
    fn default() -> Self {
        Self { read_fallback: true }
    }
}

/// Outcome of checking one record
enum RecordCheck {
    Granted,
    Expired,
    NoMatch,
}

impl PermissionEvaluator {
    pub fn new(read_fallback: bool) -> Self {
        Self { read_fallback }
    }

    pub fn read_fallback(&self) -> bool {
        self.read_fallback
    }

    pub async fn evaluate(
        &self,
        source: &dyn PermissionSource,
        request: &AccessRequest,
        now: DateTime<Utc>,
    ) -> Result<PermissionOutcome> {
        let resource = Some(request.resource.as_str());
        let mut saw_expired = false;

        let user_records = source
            .user_records(&request.user_id, &request.realm_id, resource)
            .await?;
        if let Some(record) = self.first_grant(&user_records, request, now, &mut saw_expired, explicit) {
            return Ok(self.granted(GrantSource::User, record, false, request));
        }

        let role_records = source
            .role_records(&request.user_id, &request.realm_id, resource)
            .await?;
        if let Some(record) = self.first_grant(&role_records, request, now, &mut saw_expired, explicit) {
            return Ok(self.granted(GrantSource::Role, record, false, request));
        }

        if self.read_fallback && request.action == actions::READ {
            if let Some(record) = self.first_grant(&user_records, request, now, &mut saw_expired, implied_read) {
                return Ok(self.granted(GrantSource::User, record, true, request));
            }
            if let Some(record) = self.first_grant(&role_records, request, now, &mut saw_expired, implied_read) {
                return Ok(self.granted(GrantSource::Role, record, true, request));
            }
        }

        Ok(PermissionOutcome::NoOpinion { saw_expired })
    }

    fn first_grant<'r>(
        &self,
        records: &'r [PermissionRecord],
        request: &AccessRequest,
        now: DateTime<Utc>,
        saw_expired: &mut bool,
        covers: fn(&PermissionRecord, &str) -> bool,
    ) -> Option<&'r PermissionRecord> {
        for record in records {
            match check_record(record, request, now, covers) {
                RecordCheck::Granted => return Some(record),
                RecordCheck::Expired => *saw_expired = true,
                RecordCheck::NoMatch => {}
            }
        }
        None
    }

    fn granted(
        &self,
        source: GrantSource,
        record: &PermissionRecord,
        read_fallback: bool,
        request: &AccessRequest,
    ) -> PermissionOutcome {
        debug!(
            record_id = %record.id,
            source = ?source,
            read_fallback,
            action = %request.action,
            resource = %request.resource,
            "Permission record allows request"
        );
        PermissionOutcome::Allow(PermissionGrant {
            source,
            record: record.clone(),
            read_fallback,
        })
    }

    /// Live user and role records of a user, keyed by resource; role records
    /// override user records for the same resource
    pub async fn summary(
        &self,
        source: &dyn PermissionSource,
        user_id: &str,
        realm_id: &str,
        roles: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<PermissionSummary> {
        let user_records = source.user_records(user_id, realm_id, None).await?;
        let role_records = source.role_records(user_id, realm_id, None).await?;

        let mut resources = BTreeMap::new();
        let families = [(GrantSource::User, &user_records), (GrantSource::Role, &role_records)];
        for (grant_source, records) in families {
            for record in records.iter().filter(|r| r.is_live(now)) {
                resources.insert(
                    record.resource.clone(),
                    ResourceAccess {
                        resource: record.resource.clone(),
                        level: record.level,
                        actions: record.actions.clone(),
                        source: grant_source,
                        expires_at: record.expires_at,
                    },
                );
            }
        }

        let expires_at = resources.values().filter_map(|access| access.expires_at).min();

        Ok(PermissionSummary {
            user_id: user_id.to_string(),
            realm_id: realm_id.to_string(),
            resources,
            roles,
            expires_at,
        })
    }
}

fn explicit(record: &PermissionRecord, action: &str) -> bool {
    record.has_action(action)
}

fn implied_read(record: &PermissionRecord, _action: &str) -> bool {
    record.level.implies_read()
}

fn check_record(
    record: &PermissionRecord,
    request: &AccessRequest,
    now: DateTime<Utc>,
    covers: fn(&PermissionRecord, &str) -> bool,
) -> RecordCheck {
    if !record.active
        || record.realm_id != request.realm_id
        || record.resource != request.resource
        || !covers(record, &request.action)
    {
        return RecordCheck::NoMatch;
    }
    if record.is_expired(now) {
        return RecordCheck::Expired;
    }
    if !record.conditions.evaluate(&request.context) {
        return RecordCheck::NoMatch;
    }
    RecordCheck::Granted
}

/// Per-resource access of one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAccess {
    pub resource: String,
    pub level: PermissionLevel,
    pub actions: BTreeSet<String>,
    pub source: GrantSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Everything a user may do through permission records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionSummary {
    pub user_id: UserId,
    pub realm_id: RealmId,
    pub resources: BTreeMap<String, ResourceAccess>,
    pub roles: Vec<String>,
    /// Earliest expiry among the summarized records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}
