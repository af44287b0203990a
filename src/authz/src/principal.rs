//! Principal resolution from bearer credentials
//!
//! A credential is a compact JWS (`header.claims.signature`, base64url) signed
//! with Ed25519. The resolver checks, in order: shape, algorithm, signature,
//! validity window, issuer, audience and finally, when configured, that the
//! user still exists and may authenticate.

use crate::clock::{Clock, SystemClock};
use crate::error::{AuthzError, PrincipalError, StoreError};
use crate::types::{Context, RealmId, UserId, UserRecord};
use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub mod token;

pub use token::{parse_verifying_key, Audience, Claims};
use token::Token;

/// Signing algorithm accepted by default
pub const DEFAULT_ALGORITHM: &str = "EdDSA";

/// Read-only lookup of persisted users
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: &str, realm_id: &str) -> Result<Option<UserRecord>, StoreError>;
}

/// Credential verification settings
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Expected `iss`
    pub issuer: String,

    /// Audience that `aud` must contain
    pub audience: String,

    /// Accepted JWS `alg`
    pub algorithm: String,

    /// Clock leeway applied to `nbf` and `exp`
    pub leeway_secs: u64,

    /// Confirm the user is active and approved
    pub verify_user: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            issuer: "realm-authz".to_string(),
            audience: "realm-api".to_string(),
            algorithm: DEFAULT_ALGORITHM.to_string(),
            leeway_secs: 0,
            verify_user: true,
        }
    }
}

/// The authenticated caller of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub realm_id: RealmId,
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
}

impl Principal {
    /// The `user:*` context keys
    pub fn context(&self) -> Context {
        let mut context = Context::new();
        context.insert("user:id".to_string(), self.user_id.clone().into());
        context.insert("user:realm_id".to_string(), self.realm_id.clone().into());
        context.insert("user:username".to_string(), self.username.clone().into());
        context.insert("user:email".to_string(), self.email.clone().into());
        context.insert("user:roles".to_string(), self.roles.clone().into());
        context
    }
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            realm_id: claims.realm_id,
            username: claims.username,
            email: claims.email,
            roles: claims.roles,
        }
    }
}

/// Extract the token of an `Authorization: Bearer <token>` header value
pub fn bearer_token(header: &str) -> Result<&str, PrincipalError> {
    let header = header.trim();
    if header.is_empty() {
        return Err(PrincipalError::MissingCredential);
    }

    let (scheme, token) = header.split_once(' ').unwrap_or((header, ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(PrincipalError::MalformedCredential(format!(
            "unsupported authorization scheme '{}'",
            scheme
        )));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(PrincipalError::MissingCredential);
    }
    Ok(token)
}

/// Verifies bearer credentials and turns them into [`Principal`]s
pub struct PrincipalResolver {
    config: ResolverConfig,
    key: RwLock<Arc<VerifyingKey>>,
    directory: Option<Arc<dyn UserDirectory>>,
    clock: Arc<dyn Clock>,
}

impl PrincipalResolver {
    pub fn new(config: ResolverConfig, key: VerifyingKey) -> Result<Self, AuthzError> {
        if config.algorithm != DEFAULT_ALGORITHM {
            return Err(AuthzError::Config(format!(
                "unsupported signing algorithm '{}'",
                config.algorithm
            )));
        }

        info!(
            "PrincipalResolver initialized with issuer={}, audience={}, verify_user={}",
            config.issuer, config.audience, config.verify_user
        );

        Ok(Self {
            config,
            key: RwLock::new(Arc::new(key)),
            directory: None,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Replace the verification key; in-flight resolutions keep the old one
    pub fn rotate_key(&self, key: VerifyingKey) {
        *self.key.write() = Arc::new(key);
        info!("Verification key rotated");
    }

    /// Resolve a credential, failing on any problem with it
    pub async fn resolve_principal(&self, credential: &str) -> Result<Principal, PrincipalError> {
        let claims = self.verify(credential)?;

        if self.config.verify_user {
            if let Some(directory) = &self.directory {
                let user = directory
                    .find_user(&claims.user_id, &claims.realm_id)
                    .await?
                    .ok_or(PrincipalError::UnknownUser)?;
                if !user.is_authenticable() {
                    return Err(PrincipalError::InactiveUser);
                }
            }
        }

        Ok(claims.into())
    }

    /// Optional mode: credential failures yield an anonymous caller.
    /// Directory store failures still propagate.
    pub async fn resolve_optional(
        &self,
        credential: Option<&str>,
    ) -> Result<Option<Principal>, PrincipalError> {
        let Some(credential) = credential else {
            return Ok(None);
        };

        match self.resolve_principal(credential).await {
            Ok(principal) => Ok(Some(principal)),
            Err(PrincipalError::Store(e)) => Err(PrincipalError::Store(e)),
            Err(e) => {
                debug!(kind = e.kind(), "Continuing anonymously");
                Ok(None)
            }
        }
    }

    /// Stateless credential checks
    fn verify(&self, credential: &str) -> Result<Claims, PrincipalError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(PrincipalError::MissingCredential);
        }

        let token = Token::parse(credential)?;
        if token.header.alg != self.config.algorithm {
            return Err(PrincipalError::BadAlgorithm(token.header.alg.clone()));
        }

        let signature = token.ed25519_signature()?;
        let key = self.key.read().clone();
        key.verify_strict(token.signing_input.as_bytes(), &signature)
            .map_err(|_| PrincipalError::BadSignature)?;

        let claims = token.claims()?;

        let now = self.clock.now().timestamp();
        let leeway = i64::try_from(self.config.leeway_secs).unwrap_or(i64::MAX);
        if let Some(nbf) = claims.nbf {
            if now.saturating_add(leeway) < nbf {
                return Err(PrincipalError::NotYetValid);
            }
        }
        if now.saturating_sub(leeway) >= claims.exp {
            return Err(PrincipalError::ExpiredCredential);
        }

        if claims.iss.as_deref() != Some(self.config.issuer.as_str()) {
            return Err(PrincipalError::WrongIssuer);
        }
        if !claims
            .aud
            .as_ref()
            .map_or(false, |aud| aud.contains(&self.config.audience))
        {
            return Err(PrincipalError::WrongAudience);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def.ghi").unwrap(), "abc.def.ghi");
        assert_eq!(bearer_token("bearer  abc ").unwrap(), "abc");
        assert_eq!(bearer_token(""), Err(PrincipalError::MissingCredential));
        assert_eq!(bearer_token("Bearer "), Err(PrincipalError::MissingCredential));
        assert!(matches!(
            bearer_token("Basic dXNlcjpwYXNz"),
            Err(PrincipalError::MalformedCredential(_))
        ));
        assert!(matches!(
            bearer_token("token-without-scheme"),
            Err(PrincipalError::MalformedCredential(_))
        ));
    }

    #[test]
    fn test_principal_context_keys() {
        let principal = Principal {
            user_id: "u1".into(),
            realm_id: "R1".into(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            roles: vec!["editor".into(), "viewer".into()],
        };

        let context = principal.context();
        assert_eq!(context["user:id"], serde_json::json!("u1"));
        assert_eq!(context["user:realm_id"], serde_json::json!("R1"));
        assert_eq!(context["user:roles"], serde_json::json!(["editor", "viewer"]));
        assert_eq!(context.len(), 5);
    }

    #[test]
    fn test_rejects_unsupported_algorithm_config() {
        let key = ed25519_dalek::SigningKey::from_bytes(&[1u8; 32]).verifying_key();
        let config = ResolverConfig {
            algorithm: "RS256".into(),
            ..Default::default()
        };
        assert!(matches!(PrincipalResolver::new(config, key), Err(AuthzError::Config(_))));
    }
}
