//! Bearer credential validation.
//!
//! Tokens are HS256 JWTs issued by the external auth service. This module
//! only verifies them and turns the claims into the per-connection
//! `Identity`; `mint` exists for tests and local tooling.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

pub const ROLE_ADMIN: &str = "ADMIN";

/// Identity bound to a connection at CONNECT time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Option<i64>,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Identity {
    #[must_use]
    pub fn new(user_id: Option<i64>, username: impl Into<String>, roles: Vec<String>) -> Self {
        Self { user_id, username: username.into(), roles }
    }

    /// Global administrator, independent of any board membership.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(ROLE_ADMIN))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Username.
    pub sub: String,
    #[serde(default)]
    pub uid: Option<i64>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Expiry, seconds since Unix epoch.
    pub exp: u64,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self { user_id: claims.uid, username: claims.sub, roles: claims.roles }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token rejected: {0}")]
    Invalid(String),
    #[error("token has empty subject")]
    EmptySubject,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid(err.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct TokenVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Check signature and expiry, then map claims to an `Identity`.
    ///
    /// # Errors
    ///
    /// `Expired` past `exp`, `Invalid` for a bad signature or shape,
    /// `EmptySubject` when `sub` is blank.
    pub fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        if data.claims.sub.trim().is_empty() {
            return Err(TokenError::EmptySubject);
        }
        Ok(data.claims.into())
    }

    /// Sign a token for `identity` valid for `ttl_secs` from now.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if encoding fails.
    pub fn mint(&self, identity: &Identity, ttl_secs: u64) -> Result<String, TokenError> {
        let claims = Claims {
            sub: identity.username.clone(),
            uid: identity.user_id,
            roles: identity.roles.clone(),
            exp: unix_now().saturating_add(ttl_secs),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Sign arbitrary claims. Used to build expired or malformed tokens.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if encoding fails.
    pub fn mint_claims(&self, claims: &Claims) -> Result<String, TokenError> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?)
    }
}

/// Seconds since Unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
