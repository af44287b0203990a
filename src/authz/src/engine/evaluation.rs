//! Per-request evaluation scope
//!
//! An [`Evaluation`] memoizes `policies_for` and `statements_of` for the
//! lifetime of one request and aborts at the next store call once its
//! cancellation token fires.

use super::cache::{PolicyCache, PolicyKey};
use super::decision::{reasons, Decision};
use super::DecisionEngine;
use crate::error::{AuthzError, Result, StoreError};
use crate::permission::{PermissionOutcome, PermissionRecord, PermissionSource, PermissionSummary};
use crate::policy::{Policy, PolicyOutcome, PolicySource, Statement};
use crate::principal::Principal;
use crate::types::{AccessRequest, Context, Requirement};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One request's view of the engine
pub struct Evaluation<'a> {
    engine: &'a DecisionEngine,
    cancel: CancellationToken,
    policies: Mutex<HashMap<PolicyKey, Arc<Vec<Policy>>>>,
    statements: Mutex<HashMap<String, Arc<Vec<Statement>>>>,
}

impl<'a> Evaluation<'a> {
    pub(super) fn new(engine: &'a DecisionEngine, cancel: CancellationToken) -> Self {
        Self {
            engine,
            cancel,
            policies: Mutex::new(HashMap::new()),
            statements: Mutex::new(HashMap::new()),
        }
    }

    /// Decide one (action, resource) pair
    pub async fn check(
        &self,
        principal: Option<&Principal>,
        action: &str,
        resource: &str,
        context: &Context,
    ) -> Result<Decision> {
        let start = Instant::now();

        let result = match principal {
            None => Ok(Decision::default_deny(reasons::ANONYMOUS)),
            Some(principal) => {
                let request = AccessRequest {
                    user_id: principal.user_id.clone(),
                    realm_id: principal.realm_id.clone(),
                    action: action.to_string(),
                    resource: resource.to_string(),
                    context: context.clone(),
                };
                self.decide(&request).await
            }
        };

        self.finish(principal, action, resource, result, start).await
    }

    /// Allow on the first allowing pair; otherwise the last denial
    pub async fn check_any(
        &self,
        principal: Option<&Principal>,
        requirements: &[Requirement],
        context: &Context,
    ) -> Result<Decision> {
        let mut last_denial = None;

        for requirement in requirements {
            let decision = self
                .check(principal, &requirement.action, &requirement.resource, context)
                .await?;
            if decision.allowed {
                return Ok(decision);
            }
            last_denial = Some(decision);
        }

        Ok(last_denial.unwrap_or_else(|| Decision::default_deny(reasons::NO_REQUIREMENTS)))
    }

    /// Allow only if every pair allows; the first denial otherwise.
    ///
    /// The returned allow is the first pair's, expiring with the earliest
    /// expiring grant.
    pub async fn check_all(
        &self,
        principal: Option<&Principal>,
        requirements: &[Requirement],
        context: &Context,
    ) -> Result<Decision> {
        let mut combined: Option<Decision> = None;

        for requirement in requirements {
            let decision = self
                .check(principal, &requirement.action, &requirement.resource, context)
                .await?;
            if !decision.allowed {
                return Ok(decision);
            }

            combined = Some(match combined {
                None => decision,
                Some(mut first) => {
                    first.expires_at = match (first.expires_at, decision.expires_at) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                    first
                }
            });
        }

        Ok(combined.unwrap_or_else(|| Decision::default_deny(reasons::NO_REQUIREMENTS)))
    }

    /// Permission summary of the principal
    pub async fn summary(&self, principal: &Principal) -> Result<PermissionSummary> {
        let now = self.engine.clock.now();
        self.engine
            .permission_evaluator
            .summary(self, &principal.user_id, &principal.realm_id, principal.roles.clone(), now)
            .await
    }

    /// Policy first: Deny and Allow are final. Permissions next, then
    /// default deny.
    async fn decide(&self, request: &AccessRequest) -> Result<Decision> {
        match self.engine.policy_evaluator.evaluate(self, request).await? {
            PolicyOutcome::Deny(matched) => return Ok(Decision::explicit_deny(matched)),
            PolicyOutcome::Allow(matched) => return Ok(Decision::policy_allow(&request.action, matched)),
            PolicyOutcome::NoOpinion => {}
        }

        let now = self.engine.clock.now();
        let decision = match self
            .engine
            .permission_evaluator
            .evaluate(self, request, now)
            .await?
        {
            PermissionOutcome::Allow(grant) => Decision::permission_allow(grant),
            PermissionOutcome::NoOpinion { saw_expired: true } => {
                Decision::default_deny(reasons::PERMISSION_EXPIRED)
            }
            PermissionOutcome::NoOpinion { saw_expired: false } => {
                Decision::default_deny(reasons::NO_MATCH)
            }
        };
        Ok(decision)
    }

    async fn finish(
        &self,
        principal: Option<&Principal>,
        action: &str,
        resource: &str,
        result: Result<Decision>,
        start: Instant,
    ) -> Result<Decision> {
        let metrics = self.engine.metrics.as_deref();

        match &result {
            Ok(decision) => {
                let provenance = decision.provenance.as_ref();
                info!(
                    user_id = principal.map(|p| p.user_id.as_str()).unwrap_or("-"),
                    realm_id = principal.map(|p| p.realm_id.as_str()).unwrap_or("-"),
                    action,
                    resource,
                    allowed = decision.allowed,
                    source = %decision.source,
                    reason = %decision.reason,
                    policy_id = provenance.and_then(|p| p.policy_id.as_deref()).unwrap_or("-"),
                    record_id = provenance.and_then(|p| p.record_id.as_deref()).unwrap_or("-"),
                    "Authorization decision"
                );
                if let Some(metrics) = metrics {
                    metrics.record_latency(start.elapsed()).await;
                    metrics.record_decision(decision).await;
                }
            }
            Err(AuthzError::Cancelled) => {
                warn!(action, resource, "Evaluation cancelled");
                if let Some(metrics) = metrics {
                    metrics.record_cancellation().await;
                }
            }
            Err(e) => {
                warn!(action, resource, error = %e, "Evaluation failed");
                if let Some(metrics) = metrics {
                    metrics.record_store_error().await;
                }
            }
        }

        result
    }

    /// Run a store read unless cancelled, racing it against cancellation
    async fn guarded<T, F>(&self, read: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>> + Send,
    {
        if self.cancel.is_cancelled() {
            return Err(AuthzError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AuthzError::Cancelled),
            result = read => result.map_err(|e| {
                warn!(kind = e.kind(), error = %e, "Store read failed");
                AuthzError::Store(e)
            }),
        }
    }

    /// The cross-request cache with the store generation, read before any
    /// store call so a concurrent write leaves the entry stale
    fn cache(&self) -> Option<(&'a PolicyCache, u64)> {
        let engine = self.engine;
        let cache = engine.cache.as_deref()?;
        let generation = engine.policy_store.generation()?;
        Some((cache, generation))
    }

    async fn record_cache(&self, hit: bool) {
        if let Some(metrics) = &self.engine.metrics {
            if hit {
                metrics.record_cache_hit().await;
            } else {
                metrics.record_cache_miss().await;
            }
        }
    }
}

#[async_trait]
impl PolicySource for Evaluation<'_> {
    async fn policies(&self, request: &AccessRequest) -> Result<Arc<Vec<Policy>>> {
        let key = PolicyKey::new(&request.user_id, &request.realm_id, &request.resource);

        let memoized = self.policies.lock().get(&key).cloned();
        if let Some(policies) = memoized {
            return Ok(policies);
        }

        let cache = self.cache();
        let cached = cache.and_then(|(cache, generation)| cache.policies(&key, generation));
        let policies = match cached {
            Some(policies) => {
                self.record_cache(true).await;
                policies
            }
            None => {
                let read = self.engine.policy_store.policies_for(
                    &request.user_id,
                    &request.realm_id,
                    Some(&request.resource),
                );
                let policies = Arc::new(self.guarded(read).await?);
                if let Some((cache, generation)) = cache {
                    self.record_cache(false).await;
                    cache.put_policies(key.clone(), generation, policies.clone());
                }
                policies
            }
        };

        self.policies.lock().insert(key, policies.clone());
        Ok(policies)
    }

    async fn statements(&self, policy_id: &str) -> Result<Arc<Vec<Statement>>> {
        let memoized = self.statements.lock().get(policy_id).cloned();
        if let Some(statements) = memoized {
            return Ok(statements);
        }

        let cache = self.cache();
        let cached = cache.and_then(|(cache, generation)| cache.statements(policy_id, generation));
        let statements = match cached {
            Some(statements) => {
                self.record_cache(true).await;
                statements
            }
            None => {
                let read = self.engine.policy_store.statements_of(policy_id);
                let statements = Arc::new(self.guarded(read).await?);
                if let Some((cache, generation)) = cache {
                    self.record_cache(false).await;
                    cache.put_statements(policy_id, generation, statements.clone());
                }
                statements
            }
        };

        self.statements
            .lock()
            .insert(policy_id.to_string(), statements.clone());
        Ok(statements)
    }
}

#[async_trait]
impl PermissionSource for Evaluation<'_> {
    async fn user_records(
        &self,
        user_id: &str,
        realm_id: &str,
        resource: Option<&str>,
    ) -> Result<Vec<PermissionRecord>> {
        let read = self
            .engine
            .permission_store
            .user_permissions(user_id, realm_id, resource);
        self.guarded(read).await
    }

    async fn role_records(
        &self,
        user_id: &str,
        realm_id: &str,
        resource: Option<&str>,
    ) -> Result<Vec<PermissionRecord>> {
        let read = self
            .engine
            .permission_store
            .role_permissions(user_id, realm_id, resource);
        self.guarded(read).await
    }
}
