//! Access-token signing and opaque token helpers.

use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::store::{Role, User};

/// Claims carried by a signed access token. Validity is purely the signature
/// plus the `exp` check; nothing is tracked server-side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Username.
    pub sub: String,
    pub uid: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly signed access token plus its expiry metadata.
#[derive(Debug)]
pub struct IssuedAccessToken {
    pub token: String,
    pub expires_in: u64,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies access tokens with the server secret.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl_seconds: u64,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(secret: &SecretString, access_ttl_seconds: u64) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            access_ttl_seconds,
        }
    }

    #[must_use]
    pub const fn access_ttl_seconds(&self) -> u64 {
        self.access_ttl_seconds
    }

    /// Sign a claim set for the user.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or signing fails.
    pub fn issue_access_token(&self, user: &User) -> Result<IssuedAccessToken> {
        let now = Utc::now();
        let ttl = i64::try_from(self.access_ttl_seconds).unwrap_or(i64::MAX);
        let expires_at = now + Duration::seconds(ttl);
        let claims = AccessClaims {
            sub: user.username.clone(),
            uid: user.id,
            role: user.role,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("failed to sign access token")?;
        Ok(IssuedAccessToken {
            token,
            expires_in: self.access_ttl_seconds,
            expires_at,
        })
    }

    /// Verify signature and expiry, returning the embedded claims.
    ///
    /// # Errors
    ///
    /// Returns an error for tampered, malformed, or expired tokens.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims> {
        let data = decode::<AccessClaims>(
            token,
            &self.decoding,
            &Validation::new(Algorithm::HS256),
        )
        .context("invalid access token")?;
        Ok(data.claims)
    }
}

/// Generate an opaque token: 32 random bytes, URL-safe base64 without padding.
///
/// The raw value is only ever sent to the client; stores persist the digest.
///
/// # Errors
///
/// Returns an error if the OS random source fails.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// SHA-256 digest of an opaque token, encoded for use as a storage key.
/// Raw refresh and reset tokens never touch a database or file.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
}
