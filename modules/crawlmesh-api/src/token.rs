//! Recsystem authentication tokens (spec §4.7): a signed binding of
//! `(recsystem_id, token_id, role)` handed back from `recsystem_register`
//! and rotated wholesale by `recsystem_refresh_token`.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const TOKEN_DURATION_SECS: i64 = 30 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Recsystem,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub recsystem_id: String,
    /// Must match the recsystem document's current `token_id`; a refresh
    /// rotates this, invalidating every token issued before it.
    pub token_id: String,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub jti: String,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token signing failed: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

/// Seam for recsystem credential issuance; `HmacTokenIssuer` is the only
/// implementor, but keeping it a trait keeps `recsystem_register`'s
/// rollback-on-signing-failure path (spec §4.7) testable without signing a
/// real token.
pub trait TokenIssuer: Send + Sync {
    fn issue(&self, recsystem_id: &str, token_id: &str) -> Result<String, TokenError>;
    fn verify(&self, token: &str) -> Result<Claims, TokenError>;
}

#[derive(Clone)]
pub struct HmacTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl HmacTokenIssuer {
    pub fn new(secret: &str, issuer: String) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
        }
    }
}

impl TokenIssuer for HmacTokenIssuer {
    fn issue(&self, recsystem_id: &str, token_id: &str) -> Result<String, TokenError> {
        let now = chrono::Utc::now();
        let exp = now + chrono::Duration::seconds(TOKEN_DURATION_SECS);

        let claims = Claims {
            sub: recsystem_id.to_string(),
            recsystem_id: recsystem_id.to_string(),
            token_id: token_id.to_string(),
            role: Role::Recsystem,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        Ok(decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)?)
    }
}

/// Extract a bearer token from an `Authorization` header value.
pub fn parse_bearer(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim)
}
