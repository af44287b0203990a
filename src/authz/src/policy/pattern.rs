//! Wildcard patterns for statement actions, resources and `StringLike` values
//!
//! `*` stands for any (possibly empty) run of characters and the pattern is
//! anchored at both ends. Every other character is literal, including regex
//! metacharacters. A `${...}` placeholder without a wildcard never matches.

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Upper bound on process-wide compiled patterns
const MAX_CACHED_PATTERNS: usize = 8_192;

static COMPILED: OnceLock<DashMap<String, Arc<Regex>>> = OnceLock::new();

fn compiled_cache() -> &'static DashMap<String, Arc<Regex>> {
    COMPILED.get_or_init(DashMap::new)
}

/// Pattern compilation error
#[derive(Debug, Clone, Error)]
#[error("Invalid pattern '{pattern}': {message}")]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

#[derive(Clone)]
enum Matcher {
    Exact,
    Wildcard(Arc<Regex>),
    Unresolved,
}

/// A compiled pattern; serializes as its source string
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern {
    source: String,
    matcher: Matcher,
}

impl Pattern {
    /// Compile a pattern, reusing a cached regex when one exists
    pub fn new(source: impl Into<String>) -> Result<Self, PatternError> {
        let source = source.into();

        let matcher = if source.contains('*') {
            Matcher::Wildcard(Self::compile(&source)?)
        } else if source.contains("${") {
            Matcher::Unresolved
        } else {
            Matcher::Exact
        };

        Ok(Self { source, matcher })
    }

    fn compile(source: &str) -> Result<Arc<Regex>, PatternError> {
        let cache = compiled_cache();
        if let Some(regex) = cache.get(source) {
            return Ok(regex.clone());
        }

        let body = source
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");

        let regex = Regex::new(&format!("(?s)^{}$", body)).map_err(|e| PatternError {
            pattern: source.to_string(),
            message: e.to_string(),
        })?;
        let regex = Arc::new(regex);

        if cache.len() < MAX_CACHED_PATTERNS {
            cache.insert(source.to_string(), regex.clone());
        }

        Ok(regex)
    }

    /// Match a concrete value
    pub fn matches(&self, value: &str) -> bool {
        match &self.matcher {
            Matcher::Exact => self.source == value,
            Matcher::Wildcard(regex) => regex.is_match(value),
            Matcher::Unresolved => false,
        }
    }

    /// Source text of the pattern
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self.matcher, Matcher::Wildcard(_))
    }
}

/// True if any pattern matches the value
pub fn any_matches(patterns: &[Pattern], value: &str) -> bool {
    patterns.iter().any(|p| p.matches(value))
}

impl TryFrom<String> for Pattern {
    type Error = PatternError;

    fn try_from(source: String) -> Result<Self, Self::Error> {
        Pattern::new(source)
    }
}

impl From<Pattern> for String {
    fn from(pattern: Pattern) -> Self {
        pattern.source
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Pattern {
        Pattern::new(s).unwrap()
    }

    #[test]
    fn test_exact_match() {
        assert!(p("posts").matches("posts"));
        assert!(!p("posts").matches("posts:1"));
        assert!(!p("posts").matches("Posts"));
    }

    #[test]
    fn test_wildcard_match() {
        assert!(p("*").matches(""));
        assert!(p("*").matches("anything:at:all"));
        assert!(p("posts:*").matches("posts:update"));
        assert!(p("posts:*").matches("posts:"));
        assert!(!p("posts:*").matches("wiki:update"));
        assert!(p("user:*:profile").matches("user:42:profile"));
        assert!(p("*:read").matches("wiki:read"));
    }

    #[test]
    fn test_wildcard_is_anchored() {
        assert!(!p("post*").matches("xposts"));
        assert!(!p("*s").matches("postsx"));
    }

    #[test]
    fn test_metacharacters_are_literal() {
        assert!(p("file.*").matches("file.txt"));
        assert!(!p("file.*").matches("filetxt"));
        assert!(p("a+b*").matches("a+bc"));
        assert!(!p("a+b*").matches("aab"));
        assert!(p("(x)*").matches("(x)y"));
        assert!(p("[abc]*").matches("[abc]"));
        assert!(!p("[abc]*").matches("a"));
    }

    #[test]
    fn test_wildcard_spans_newlines() {
        assert!(p("a*b").matches("a\nb"));
    }

    #[test]
    fn test_unresolved_placeholder_never_matches() {
        let pattern = p("user:${user:id}");
        assert!(!pattern.matches("user:${user:id}"));
        assert!(!pattern.matches("user:42"));
    }

    #[test]
    fn test_serde_round_trip_keeps_source() {
        let pattern: Pattern = serde_json::from_str("\"posts:*\"").unwrap();
        assert!(pattern.is_wildcard());
        assert_eq!(serde_json::to_string(&pattern).unwrap(), "\"posts:*\"");
    }

    #[test]
    fn test_compiled_patterns_are_shared() {
        let a = p("shared:*:cache");
        let b = p("shared:*:cache");
        match (&a.matcher, &b.matcher) {
            (Matcher::Wildcard(x), Matcher::Wildcard(y)) => assert!(Arc::ptr_eq(x, y)),
            _ => panic!("expected wildcard matchers"),
        }
    }
}
