//! Allow/deny evaluation of an access request against IAM-style policies

use crate::error::Result;
use crate::policy::{pattern, Effect, Policy, Statement};
use crate::types::AccessRequest;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Where the evaluator reads policies from.
///
/// The engine implements this over a [`PolicyStore`](crate::policy::PolicyStore)
/// with per-request memoization and cancellation.
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn policies(&self, request: &AccessRequest) -> Result<Arc<Vec<Policy>>>;

    async fn statements(&self, policy_id: &str) -> Result<Arc<Vec<Statement>>>;
}

/// The statement that decided the outcome; for server logs only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyMatch {
    pub policy_id: String,
    pub policy_name: String,
    pub statement_sid: String,
}

/// Result of policy evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// A matched statement denies; final
    Deny(PolicyMatch),
    /// At least one statement allows and none denies
    Allow(PolicyMatch),
    /// No statement matched
    NoOpinion,
}

/// Stateless policy evaluator
#[derive(Debug, Default, Clone, Copy)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// A statement matches iff the action matches one of its action
    /// patterns, the resource matches one of its resource patterns and every
    /// condition holds
    pub fn statement_matches(&self, statement: &Statement, request: &AccessRequest) -> bool {
        pattern::any_matches(&statement.actions, &request.action)
            && pattern::any_matches(&statement.resources, &request.resource)
            && statement.conditions.evaluate(&request.context)
    }

    /// Evaluate the request against every applicable policy.
    ///
    /// Any matched Deny wins regardless of Allows, so evaluation stops at the
    /// first one. The first matched Allow is kept for provenance.
    pub async fn evaluate(
        &self,
        source: &dyn PolicySource,
        request: &AccessRequest,
    ) -> Result<PolicyOutcome> {
        let policies = source.policies(request).await?;
        let mut first_allow: Option<PolicyMatch> = None;

        for policy in policies.iter() {
            let statements = source.statements(&policy.id).await?;

            for statement in statements.iter() {
                if !self.statement_matches(statement, request) {
                    continue;
                }

                let matched = PolicyMatch {
                    policy_id: policy.id.clone(),
                    policy_name: policy.name.clone(),
                    statement_sid: statement.sid.clone(),
                };

                match statement.effect {
                    Effect::Deny => {
                        debug!(
                            policy_id = %policy.id,
                            sid = %statement.sid,
                            action = %request.action,
                            resource = %request.resource,
                            "Statement denies request"
                        );
                        return Ok(PolicyOutcome::Deny(matched));
                    }
                    Effect::Allow => {
                        debug!(
                            policy_id = %policy.id,
                            sid = %statement.sid,
                            "Statement allows request"
                        );
                        if first_allow.is_none() {
                            first_allow = Some(matched);
                        }
                    }
                }
            }
        }

        Ok(first_allow.map_or(PolicyOutcome::NoOpinion, PolicyOutcome::Allow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ConditionSet;
    use serde_json::json;
    use std::collections::HashMap;

    struct Fixed {
        policies: Vec<Policy>,
        statements: HashMap<String, Vec<Statement>>,
    }

    #[async_trait]
    impl PolicySource for Fixed {
        async fn policies(&self, _request: &AccessRequest) -> Result<Arc<Vec<Policy>>> {
            Ok(Arc::new(self.policies.clone()))
        }

        async fn statements(&self, policy_id: &str) -> Result<Arc<Vec<Statement>>> {
            Ok(Arc::new(self.statements.get(policy_id).cloned().unwrap_or_default()))
        }
    }

    fn source(statements: Vec<(&str, Statement)>) -> Fixed {
        let mut by_policy: HashMap<String, Vec<Statement>> = HashMap::new();
        let mut policies = Vec::new();
        for (policy_id, statement) in statements {
            if !by_policy.contains_key(policy_id) {
                policies.push(Policy::new(policy_id, "R1", format!("policy {}", policy_id)));
            }
            by_policy.entry(policy_id.to_string()).or_default().push(statement);
        }
        Fixed {
            policies,
            statements: by_policy,
        }
    }

    fn stmt(effect: Effect, actions: &[&str], resources: &[&str]) -> Statement {
        Statement::new("s", "p", effect, actions.iter().copied(), resources.iter().copied()).unwrap()
    }

    #[tokio::test]
    async fn test_allow_when_statement_matches() {
        let src = source(vec![("p1", stmt(Effect::Allow, &["read"], &["posts"]))]);
        let request = AccessRequest::new("u1", "R1", "read", "posts");

        let outcome = PolicyEvaluator::new().evaluate(&src, &request).await.unwrap();
        assert!(matches!(outcome, PolicyOutcome::Allow(m) if m.policy_id == "p1"));
    }

    #[tokio::test]
    async fn test_no_opinion_without_match() {
        let src = source(vec![("p1", stmt(Effect::Allow, &["read"], &["posts"]))]);
        let request = AccessRequest::new("u1", "R1", "delete", "posts");

        let outcome = PolicyEvaluator::new().evaluate(&src, &request).await.unwrap();
        assert_eq!(outcome, PolicyOutcome::NoOpinion);
    }

    #[tokio::test]
    async fn test_deny_beats_allow_in_any_order() {
        let allow = stmt(Effect::Allow, &["read"], &["posts"]);
        let deny = stmt(Effect::Deny, &["*"], &["posts"]);
        let request = AccessRequest::new("u1", "R1", "read", "posts");

        let allow_first = source(vec![("p1", allow.clone()), ("p2", deny.clone())]);
        let deny_first = source(vec![("p2", deny), ("p1", allow)]);

        for src in [allow_first, deny_first] {
            let outcome = PolicyEvaluator::new().evaluate(&src, &request).await.unwrap();
            assert!(matches!(outcome, PolicyOutcome::Deny(m) if m.policy_id == "p2"));
        }
    }

    #[tokio::test]
    async fn test_deny_in_same_policy_after_allow() {
        let src = source(vec![
            ("p1", stmt(Effect::Allow, &["*"], &["*"])),
            ("p1", stmt(Effect::Deny, &["delete"], &["posts"])),
        ]);
        let request = AccessRequest::new("u1", "R1", "delete", "posts");

        let outcome = PolicyEvaluator::new().evaluate(&src, &request).await.unwrap();
        assert!(matches!(outcome, PolicyOutcome::Deny(_)));
    }

    #[tokio::test]
    async fn test_conditions_gate_statement() {
        let statement = stmt(Effect::Allow, &["read"], &["posts"]).with_conditions(
            ConditionSet::from_json(json!({"StringEquals": {"user:realm_id": "R1"}})),
        );
        let src = source(vec![("p1", statement)]);

        let same_realm = AccessRequest::new("u1", "R1", "read", "posts").with_context("user:realm_id", "R1");
        let other_realm = AccessRequest::new("u1", "R1", "read", "posts").with_context("user:realm_id", "R2");

        let evaluator = PolicyEvaluator::new();
        assert!(matches!(evaluator.evaluate(&src, &same_realm).await.unwrap(), PolicyOutcome::Allow(_)));
        assert_eq!(evaluator.evaluate(&src, &other_realm).await.unwrap(), PolicyOutcome::NoOpinion);
    }

    #[tokio::test]
    async fn test_denied_condition_does_not_deny() {
        let deny = stmt(Effect::Deny, &["*"], &["posts"])
            .with_conditions(ConditionSet::from_json(json!({"Bool": {"locked": true}})));
        let src = source(vec![("p1", stmt(Effect::Allow, &["read"], &["posts"])), ("p2", deny)]);

        let unlocked = AccessRequest::new("u1", "R1", "read", "posts").with_context("locked", false);
        let outcome = PolicyEvaluator::new().evaluate(&src, &unlocked).await.unwrap();
        assert!(matches!(outcome, PolicyOutcome::Allow(_)));
    }
}
