//! Environment-driven configuration

use crate::engine::{CacheConfig, EngineConfig};
use crate::error::AuthzError;
use crate::principal::{parse_verifying_key, ResolverConfig};
use ed25519_dalek::VerifyingKey;
use std::path::PathBuf;
use std::time::Duration;

/// Everything the decision service reads from its environment
#[derive(Debug, Clone)]
pub struct AuthzConfig {
    pub port: u16,
    pub engine: EngineConfig,
    pub resolver: ResolverConfig,

    /// Inline public key material (PEM or base64)
    pub public_key: Option<String>,

    /// File holding the public key material
    pub public_key_file: Option<PathBuf>,

    /// JSON snapshot for the in-memory store
    pub snapshot: Option<PathBuf>,

    pub database_url: Option<String>,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            engine: EngineConfig::default(),
            resolver: ResolverConfig::default(),
            public_key: None,
            public_key_file: None,
            snapshot: None,
            database_url: None,
        }
    }
}

impl AuthzConfig {
    /// Read configuration from process environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`; unset or unparsable values fall
    /// back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |name: &str| lookup(name).filter(|s| !s.trim().is_empty());

        let resolver = ResolverConfig {
            issuer: parse("AUTHZ_ISSUER").unwrap_or(defaults.resolver.issuer),
            audience: parse("AUTHZ_AUDIENCE").unwrap_or(defaults.resolver.audience),
            algorithm: parse("AUTHZ_ALGORITHM").unwrap_or(defaults.resolver.algorithm),
            leeway_secs: parse("AUTHZ_LEEWAY_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.resolver.leeway_secs),
            verify_user: parse("AUTHZ_VERIFY_USER")
                .and_then(|s| parse_bool(&s))
                .unwrap_or(defaults.resolver.verify_user),
        };

        let engine = EngineConfig {
            enable_policy_cache: parse("AUTHZ_POLICY_CACHE")
                .and_then(|s| parse_bool(&s))
                .unwrap_or(defaults.engine.enable_policy_cache),
            cache_config: CacheConfig {
                capacity: parse("AUTHZ_POLICY_CACHE_SIZE")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.engine.cache_config.capacity),
                ttl: parse("AUTHZ_POLICY_CACHE_TTL")
                    .and_then(|s| s.parse().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.engine.cache_config.ttl),
            },
            read_fallback: parse("AUTHZ_READ_FALLBACK")
                .and_then(|s| parse_bool(&s))
                .unwrap_or(defaults.engine.read_fallback),
            ..defaults.engine
        };

        Self {
            port: parse("PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            engine,
            resolver,
            public_key: parse("AUTHZ_PUBLIC_KEY"),
            public_key_file: parse("AUTHZ_PUBLIC_KEY_FILE").map(PathBuf::from),
            snapshot: parse("AUTHZ_SNAPSHOT").map(PathBuf::from),
            database_url: parse("DATABASE_URL"),
        }
    }

    /// Load the credential verification key. Inline material wins over the
    /// file.
    pub fn verifying_key(&self) -> Result<VerifyingKey, AuthzError> {
        if let Some(material) = &self.public_key {
            return parse_verifying_key(material);
        }

        let path = self.public_key_file.as_ref().ok_or_else(|| {
            AuthzError::Config("AUTHZ_PUBLIC_KEY or AUTHZ_PUBLIC_KEY_FILE must be set".to_string())
        })?;

        let material = std::fs::read_to_string(path).map_err(|e| {
            AuthzError::Config(format!("cannot read public key file {}: {}", path.display(), e))
        })?;
        parse_verifying_key(&material)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
