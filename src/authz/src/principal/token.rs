//! Compact JWS decoding and Ed25519 key material

use crate::error::{AuthzError, PrincipalError};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// JOSE header fields the resolver looks at
#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub alg: String,
    #[serde(default)]
    pub typ: Option<String>,
}

/// `aud` may be a single string or an array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::One(aud) => aud == audience,
            Audience::Many(list) => list.iter().any(|aud| aud == audience),
        }
    }
}

/// Claim set carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub realm_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    pub exp: i64,
}

/// A split, decoded but not yet verified token
pub(crate) struct Token<'a> {
    pub header: Header,
    pub claims_segment: &'a str,
    /// `header.claims` as signed
    pub signing_input: &'a str,
    /// Raw signature bytes; their length depends on `alg`
    pub signature: Vec<u8>,
}

impl<'a> Token<'a> {
    pub fn parse(credential: &'a str) -> Result<Self, PrincipalError> {
        let mut segments = credential.splitn(4, '.');
        let (header_segment, claims, signature) =
            match (segments.next(), segments.next(), segments.next(), segments.next()) {
                (Some(h), Some(c), Some(s), None) if !h.is_empty() && !c.is_empty() => (h, c, s),
                _ => {
                    return Err(PrincipalError::MalformedCredential(
                        "expected three dot-separated segments".to_string(),
                    ))
                }
            };

        let header: Header = decode_json(header_segment, "header")?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| malformed("signature", e))?;

        let signing_input = &credential[..header_segment.len() + 1 + claims.len()];

        Ok(Self {
            header,
            claims_segment: claims,
            signing_input,
            signature,
        })
    }

    pub fn claims(&self) -> Result<Claims, PrincipalError> {
        decode_json(self.claims_segment, "claims")
    }

    /// Ed25519 signature; call only once `alg` has been checked
    pub fn ed25519_signature(&self) -> Result<Signature, PrincipalError> {
        Signature::from_slice(&self.signature).map_err(|_| PrincipalError::BadSignature)
    }
}

fn malformed(segment: &str, err: impl std::fmt::Display) -> PrincipalError {
    PrincipalError::MalformedCredential(format!("{}: {}", segment, err))
}

fn decode_json<T: DeserializeOwned>(segment: &str, name: &str) -> Result<T, PrincipalError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| malformed(name, e))?;
    serde_json::from_slice(&bytes).map_err(|e| malformed(name, e))
}

/// Parse an Ed25519 public key from PEM (SPKI) or base64 of the raw 32 bytes
pub fn parse_verifying_key(material: &str) -> Result<VerifyingKey, AuthzError> {
    let material = material.trim();

    if material.starts_with("-----BEGIN") {
        return VerifyingKey::from_public_key_pem(material)
            .map_err(|e| AuthzError::Config(format!("invalid public key PEM: {}", e)));
    }

    let raw = STANDARD
        .decode(material)
        .or_else(|_| URL_SAFE_NO_PAD.decode(material))
        .map_err(|e| AuthzError::Config(format!("invalid public key encoding: {}", e)))?;
    let raw: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| AuthzError::Config(format!("public key must be 32 bytes, got {}", raw.len())))?;

    VerifyingKey::from_bytes(&raw).map_err(|e| AuthzError::Config(format!("invalid public key: {}", e)))
}
