//! Token material, password hashing and bearer-token validation.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const TOKEN_BYTES: usize = 32;
/// bcrypt work factor for stored passwords.
pub const PASSWORD_COST: u32 = 10;

/// Current time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

// ---------------------------------------------------------------------------
// One-time tokens
// ---------------------------------------------------------------------------

/// A freshly generated one-time token.
///
/// `token` is the secret sent to the user; only `hash` is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenData {
    pub id: String,
    pub token: String,
    pub hash: String,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Generates a URL-safe random token valid for `ttl`.
#[must_use]
pub fn generate_token(ttl: Duration) -> TokenData {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);
    let created_at = now_millis();
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    TokenData {
        id: uuid::Uuid::new_v4().to_string(),
        hash: hash_token(&token),
        token,
        created_at,
        expires_at: created_at.saturating_add(ttl_ms),
    }
}

/// Hex SHA-256 of a token secret.
#[must_use]
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Constant-time comparison of a presented secret against a stored hash.
#[must_use]
pub fn verify_token(token: &str, stored_hash: &str) -> bool {
    hash_token(token).as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

/// bcrypt hash of `password` (`$2b$<cost>$<salt+digest>`).
///
/// # Errors
///
/// Fails when bcrypt rejects the cost or the input.
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, PASSWORD_COST)
}

/// Checks `password` against a hash produced by [`hash_password`].
///
/// A malformed stored hash never matches.
#[must_use]
pub fn verify_password(stored: &str, password: &str) -> bool {
    bcrypt::verify(password, stored).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Bearer tokens
// ---------------------------------------------------------------------------

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub roles: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("invalid bearer token: {0}")]
    Invalid(String),
}

/// Validates bearer tokens presented on protected methods.
pub trait TokenValidator: fmt::Debug + Send + Sync {
    /// # Errors
    ///
    /// Returns [`AuthError::Invalid`] when the token is malformed, expired or
    /// badly signed.
    fn validate(&self, token: &str) -> Result<Claims, AuthError>;
}

/// HS256 JWT validator.
#[derive(Clone)]
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtValidator").finish_non_exhaustive()
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::Invalid(e.to_string()))
    }
}
