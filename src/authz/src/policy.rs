//! IAM-style policy definitions and storage
//!
//! A [`Policy`] is a named, versioned container of [`Statement`]s. Policies
//! reach a user through direct bindings, through the user's roles, or through
//! a resource binding that matches the requested resource.

use crate::error::StoreError;
use crate::types::PolicyId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod condition;
pub mod evaluator;
pub mod pattern;

pub use condition::{ConditionSet, ConditionValue, Operator};
pub use evaluator::{PolicyEvaluator, PolicyMatch, PolicyOutcome, PolicySource};
pub use pattern::{Pattern, PatternError};

/// Statement effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    /// Allow the action
    Allow,
    /// Deny the action; overrides every Allow
    Deny,
}

impl FromStr for Effect {
    type Err = StatementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Allow" => Ok(Effect::Allow),
            "Deny" => Ok(Effect::Deny),
            other => Err(StatementError::UnknownEffect(other.to_string())),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Allow => f.write_str("Allow"),
            Effect::Deny => f.write_str("Deny"),
        }
    }
}

/// Policy definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Unique policy identifier
    pub id: PolicyId,

    /// Owning realm
    pub realm_id: String,

    /// Policy name
    pub name: String,

    /// Policy language version (e.g. "2012-10-17")
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub description: String,
}

impl Policy {
    pub fn new(id: impl Into<String>, realm_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            realm_id: realm_id.into(),
            name: name.into(),
            version: "2012-10-17".to_string(),
            description: String::new(),
        }
    }
}

/// Invalid statement definition
#[derive(Debug, Clone, Error)]
pub enum StatementError {
    #[error("statement has no actions")]
    EmptyActions,

    #[error("statement has no resources")]
    EmptyResources,

    #[error("unknown effect '{0}'")]
    UnknownEffect(String),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("invalid JSON in column '{column}': {message}")]
    Json { column: &'static str, message: String },
}

impl From<StatementError> for StoreError {
    fn from(err: StatementError) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Single Allow/Deny rule of a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StatementDef")]
pub struct Statement {
    pub id: String,
    pub policy_id: PolicyId,
    #[serde(default)]
    pub sid: String,
    pub effect: Effect,
    pub actions: Vec<Pattern>,
    pub resources: Vec<Pattern>,
    #[serde(default)]
    pub conditions: ConditionSet,
}

/// Unvalidated serde form of [`Statement`]
#[derive(Deserialize)]
struct StatementDef {
    id: String,
    policy_id: PolicyId,
    #[serde(default)]
    sid: String,
    effect: Effect,
    actions: Vec<Pattern>,
    resources: Vec<Pattern>,
    #[serde(default)]
    conditions: ConditionSet,
}

impl TryFrom<StatementDef> for Statement {
    type Error = StatementError;

    fn try_from(def: StatementDef) -> Result<Self, Self::Error> {
        Statement::validated(Statement {
            id: def.id,
            policy_id: def.policy_id,
            sid: def.sid,
            effect: def.effect,
            actions: def.actions,
            resources: def.resources,
            conditions: def.conditions,
        })
    }
}

impl Statement {
    /// Build a statement from pattern strings
    pub fn new<A, R>(
        id: impl Into<String>,
        policy_id: impl Into<String>,
        effect: Effect,
        actions: A,
        resources: R,
    ) -> Result<Self, StatementError>
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        let actions = actions
            .into_iter()
            .map(Pattern::new)
            .collect::<Result<Vec<_>, _>>()?;
        let resources = resources
            .into_iter()
            .map(Pattern::new)
            .collect::<Result<Vec<_>, _>>()?;

        Self::validated(Statement {
            id: id.into(),
            policy_id: policy_id.into(),
            sid: String::new(),
            effect,
            actions,
            resources,
            conditions: ConditionSet::default(),
        })
    }

    /// Parse the persisted form where actions, resources and conditions are
    /// JSON strings
    pub fn from_json_columns(
        id: impl Into<String>,
        policy_id: impl Into<String>,
        sid: impl Into<String>,
        effect: &str,
        actions: &str,
        resources: &str,
        conditions: Option<&str>,
    ) -> Result<Self, StatementError> {
        let effect: Effect = effect.parse()?;

        let actions: Vec<String> = serde_json::from_str(actions).map_err(|e| StatementError::Json {
            column: "actions",
            message: e.to_string(),
        })?;
        let resources: Vec<String> =
            serde_json::from_str(resources).map_err(|e| StatementError::Json {
                column: "resources",
                message: e.to_string(),
            })?;
        let conditions = ConditionSet::from_json_str(conditions.unwrap_or_default()).map_err(|e| {
            StatementError::Json {
                column: "conditions",
                message: e.to_string(),
            }
        })?;

        Ok(Self::new(id, policy_id, effect, actions, resources)?
            .with_sid(sid)
            .with_conditions(conditions))
    }

    fn validated(statement: Statement) -> Result<Self, StatementError> {
        if statement.actions.is_empty() {
            return Err(StatementError::EmptyActions);
        }
        if statement.resources.is_empty() {
            return Err(StatementError::EmptyResources);
        }
        Ok(statement)
    }

    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = sid.into();
        self
    }

    pub fn with_conditions(mut self, conditions: ConditionSet) -> Self {
        self.conditions = conditions;
        self
    }
}

/// Read-only policy store
///
/// Implementations must return a stable order within one request.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Every policy of `realm_id` bound to the user directly, through one of
    /// the user's roles, or through a resource binding matching `resource`
    async fn policies_for(
        &self,
        user_id: &str,
        realm_id: &str,
        resource: Option<&str>,
    ) -> Result<Vec<Policy>, StoreError>;

    /// All statements of a policy in declared order
    async fn statements_of(&self, policy_id: &str) -> Result<Vec<Statement>, StoreError>;

    /// Counter that moves on every write affecting `policies_for` or
    /// `statements_of`. `None` when the store cannot observe its writes; the
    /// engine then never keeps its reads across requests.
    fn generation(&self) -> Option<u64> {
        None
    }
}
