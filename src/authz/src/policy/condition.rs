//! Typed condition operators
//!
//! A condition map has operator keys (`StringEquals`, `Bool`, ...) whose
//! values map context-attribute names to expected values. Expected values are
//! parsed once into the shape their operator needs; evaluation only coerces
//! the request context.
//!
//! ```json
//! {
//!   "StringEquals": { "user:realm_id": "R1" },
//!   "StringLike":   { "user:email": "*@example.com" },
//!   "Bool":         { "mfa": true }
//! }
//! ```

use crate::policy::pattern::Pattern;
use crate::types::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Expected value as written in a condition map
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    String(String),
    Number(f64),
    Bool(bool),
    StringList(Vec<String>),
}

impl ConditionValue {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Array(items) => items
                .iter()
                .map(scalar_to_string)
                .collect::<Option<Vec<_>>>()
                .map(Self::StringList),
            Value::Null | Value::Object(_) => None,
        }
    }

    fn strings(&self) -> Vec<String> {
        match self {
            Self::String(s) => vec![s.clone()],
            Self::Number(n) => vec![format_number(*n)],
            Self::Bool(b) => vec![b.to_string()],
            Self::StringList(items) => items.clone(),
        }
    }

    fn numbers(&self) -> Option<Vec<f64>> {
        match self {
            Self::Number(n) => Some(vec![*n]),
            Self::String(s) => s.trim().parse().ok().map(|n| vec![n]),
            Self::StringList(items) => items.iter().map(|s| s.trim().parse().ok()).collect(),
            Self::Bool(_) => None,
        }
    }

    fn boolean(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Condition operator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    StringEquals,
    StringNotEquals,
    StringLike,
    StringNotLike,
    NumericEquals,
    NumericNotEquals,
    NumericLessThan,
    NumericLessThanEquals,
    NumericGreaterThan,
    NumericGreaterThanEquals,
    Bool,
    /// Not understood; always evaluates false
    Unknown(String),
}

impl Operator {
    /// Resolve an operator name; unrecognised names become `Unknown`
    pub fn from_name(name: &str) -> Self {
        match name {
            "StringEquals" => Self::StringEquals,
            "StringNotEquals" => Self::StringNotEquals,
            "StringLike" => Self::StringLike,
            "StringNotLike" => Self::StringNotLike,
            "NumericEquals" => Self::NumericEquals,
            "NumericNotEquals" => Self::NumericNotEquals,
            "NumericLessThan" => Self::NumericLessThan,
            "NumericLessThanEquals" => Self::NumericLessThanEquals,
            "NumericGreaterThan" => Self::NumericGreaterThan,
            "NumericGreaterThanEquals" => Self::NumericGreaterThanEquals,
            "Bool" => Self::Bool,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl FromStr for Operator {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StringEquals => "StringEquals",
            Self::StringNotEquals => "StringNotEquals",
            Self::StringLike => "StringLike",
            Self::StringNotLike => "StringNotLike",
            Self::NumericEquals => "NumericEquals",
            Self::NumericNotEquals => "NumericNotEquals",
            Self::NumericLessThan => "NumericLessThan",
            Self::NumericLessThanEquals => "NumericLessThanEquals",
            Self::NumericGreaterThan => "NumericGreaterThan",
            Self::NumericGreaterThanEquals => "NumericGreaterThanEquals",
            Self::Bool => "Bool",
            Self::Unknown(name) => name,
        };
        f.write_str(name)
    }
}

/// Expected value after operator-specific coercion
#[derive(Debug, Clone)]
enum Expected {
    Strings(Vec<String>),
    Patterns(Vec<Pattern>),
    Numbers(Vec<f64>),
    Bool(bool),
    /// Could not be coerced for this operator
    Invalid,
}

#[derive(Debug, Clone)]
struct Clause {
    key: String,
    expected: Expected,
}

#[derive(Debug, Clone)]
struct Condition {
    operator: Operator,
    clauses: Vec<Clause>,
    /// Operator value was not a map
    malformed: bool,
}

/// Parsed condition map of a statement or permission record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct ConditionSet {
    raw: Value,
    conditions: Vec<Condition>,
    malformed: bool,
}

impl Default for ConditionSet {
    fn default() -> Self {
        Self {
            raw: Value::Object(Default::default()),
            conditions: Vec::new(),
            malformed: false,
        }
    }
}

impl PartialEq for ConditionSet {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl ConditionSet {
    /// Parse a condition map. `null` and `{}` yield an empty set.
    pub fn from_json(raw: Value) -> Self {
        if raw.is_null() {
            return Self::default();
        }

        let parsed = raw.as_object().map(parse_operators);
        match parsed {
            Some(conditions) => Self {
                raw,
                conditions,
                malformed: false,
            },
            None => Self {
                raw,
                conditions: Vec::new(),
                malformed: true,
            },
        }
    }

    /// Parse the JSON-string form stored in a database column
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(Self::from_json(serde_json::from_str(text)?))
    }

    pub fn is_empty(&self) -> bool {
        !self.malformed && self.conditions.is_empty()
    }

    /// Source map as persisted
    pub fn as_json(&self) -> &Value {
        &self.raw
    }

    /// Every operator map must match (logical AND)
    pub fn evaluate(&self, context: &Context) -> bool {
        if self.malformed {
            return false;
        }
        self.conditions.iter().all(|c| c.evaluate(context))
    }
}

impl From<Value> for ConditionSet {
    fn from(raw: Value) -> Self {
        Self::from_json(raw)
    }
}

impl From<ConditionSet> for Value {
    fn from(set: ConditionSet) -> Self {
        set.raw
    }
}

impl Condition {
    fn evaluate(&self, context: &Context) -> bool {
        if self.malformed {
            return false;
        }

        match &self.operator {
            Operator::Unknown(name) => {
                warn!(operator = %name, "Unknown condition operator, failing closed");
                false
            }
            Operator::StringNotEquals | Operator::StringNotLike | Operator::NumericNotEquals => {
                !self.all_clauses(context)
            }
            _ => self.all_clauses(context),
        }
    }

    /// Every key within the operator map matches
    fn all_clauses(&self, context: &Context) -> bool {
        self.clauses.iter().all(|clause| {
            context
                .get(&clause.key)
                .map(|actual| clause_matches(&self.operator, &clause.expected, actual))
                .unwrap_or(false)
        })
    }
}

fn parse_operators(map: &serde_json::Map<String, Value>) -> Vec<Condition> {
    map.iter()
        .map(|(name, value)| {
            let operator = Operator::from_name(name);
            match value {
                Value::Object(entries) => Condition {
                    clauses: entries
                        .iter()
                        .map(|(key, expected)| Clause {
                            key: key.clone(),
                            expected: coerce(&operator, expected),
                        })
                        .collect(),
                    operator,
                    malformed: false,
                },
                _ => Condition {
                    operator,
                    clauses: Vec::new(),
                    malformed: true,
                },
            }
        })
        .collect()
}

fn coerce(operator: &Operator, expected: &Value) -> Expected {
    let Some(value) = ConditionValue::from_json(expected) else {
        return Expected::Invalid;
    };

    match operator {
        Operator::StringEquals | Operator::StringNotEquals => Expected::Strings(value.strings()),
        Operator::StringLike | Operator::StringNotLike => value
            .strings()
            .into_iter()
            .map(Pattern::new)
            .collect::<Result<Vec<_>, _>>()
            .map(Expected::Patterns)
            .unwrap_or(Expected::Invalid),
        Operator::NumericEquals
        | Operator::NumericNotEquals
        | Operator::NumericLessThan
        | Operator::NumericLessThanEquals
        | Operator::NumericGreaterThan
        | Operator::NumericGreaterThanEquals => {
            value.numbers().map(Expected::Numbers).unwrap_or(Expected::Invalid)
        }
        Operator::Bool => value.boolean().map(Expected::Bool).unwrap_or(Expected::Invalid),
        Operator::Unknown(_) => Expected::Invalid,
    }
}

/// Positive form of the operator; negated operators are inverted by the caller
fn clause_matches(operator: &Operator, expected: &Expected, actual: &Value) -> bool {
    match expected {
        Expected::Strings(expected) => string_values(actual)
            .map(|actual| actual.iter().any(|a| expected.iter().any(|e| e == a)))
            .unwrap_or(false),
        Expected::Patterns(patterns) => string_values(actual)
            .map(|actual| actual.iter().any(|a| patterns.iter().any(|p| p.matches(a))))
            .unwrap_or(false),
        Expected::Numbers(expected) => {
            let Some(actual) = number_values(actual) else {
                return false;
            };
            let compare = |a: f64, e: f64| match operator {
                Operator::NumericLessThan => a < e,
                Operator::NumericLessThanEquals => a <= e,
                Operator::NumericGreaterThan => a > e,
                Operator::NumericGreaterThanEquals => a >= e,
                _ => a == e,
            };
            actual.iter().any(|a| expected.iter().any(|e| compare(*a, *e)))
        }
        Expected::Bool(expected) => matches!(actual, Value::Bool(b) if b == expected),
        Expected::Invalid => false,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => n.as_f64().map(format_number),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// String coercion of a context value; arrays yield their scalar elements
fn string_values(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(scalar_to_string).collect()),
        other => scalar_to_string(other).map(|s| vec![s]),
    }
}

/// Numeric coercion of a context value; numeric strings are accepted
fn number_values(value: &Value) -> Option<Vec<f64>> {
    match value {
        Value::Number(n) => n.as_f64().map(|n| vec![n]),
        Value::String(s) => s.trim().parse().ok().map(|n| vec![n]),
        Value::Array(items) => Some(items.iter().filter_map(|i| number_values(i)).flatten().collect()),
        _ => None,
    }
}
