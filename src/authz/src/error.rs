//! Error types for the authorization engine

use thiserror::Error;

/// Failures reported by policy, permission and user stores
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Backend cannot be reached (pool exhausted, connection refused)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Temporary failure; the caller may retry with its own budget
    #[error("Transient store failure: {0}")]
    Transient(String),

    /// Persisted data cannot be interpreted; never answer from it
    #[error("Corrupt store data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Kebab-case kind used in logs and error mapping
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "store-unavailable",
            StoreError::Transient(_) => "store-transient",
            StoreError::Corrupt(_) => "store-corrupt",
        }
    }

    /// Whether an upstream caller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Credential resolution failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrincipalError {
    #[error("Credential missing")]
    MissingCredential,

    #[error("Malformed credential: {0}")]
    MalformedCredential(String),

    #[error("Unexpected signing algorithm: {0}")]
    BadAlgorithm(String),

    #[error("Credential signature invalid")]
    BadSignature,

    #[error("Credential has expired")]
    ExpiredCredential,

    #[error("Credential not yet valid")]
    NotYetValid,

    #[error("Credential issuer mismatch")]
    WrongIssuer,

    #[error("Credential audience mismatch")]
    WrongAudience,

    #[error("Unknown user")]
    UnknownUser,

    #[error("User is inactive")]
    InactiveUser,

    /// User directory lookup failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PrincipalError {
    /// Kebab-case kind used in logs and error mapping
    pub fn kind(&self) -> &'static str {
        match self {
            PrincipalError::MissingCredential => "missing-credential",
            PrincipalError::MalformedCredential(_) => "malformed-credential",
            PrincipalError::BadAlgorithm(_) => "bad-algorithm",
            PrincipalError::BadSignature => "bad-signature",
            PrincipalError::ExpiredCredential => "expired-credential",
            PrincipalError::NotYetValid => "not-yet-valid",
            PrincipalError::WrongIssuer => "wrong-issuer",
            PrincipalError::WrongAudience => "wrong-audience",
            PrincipalError::UnknownUser => "unknown-user",
            PrincipalError::InactiveUser => "inactive-user",
            PrincipalError::Store(e) => e.kind(),
        }
    }

    /// True for failures of the credential itself, false for store failures
    pub fn is_credential_error(&self) -> bool {
        !matches!(self, PrincipalError::Store(_))
    }
}

/// Authorization engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// A store read failed; no decision was produced
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The request deadline fired before evaluation finished
    #[error("Evaluation cancelled")]
    Cancelled,

    /// Invalid input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
