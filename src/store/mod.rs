//! Storage backends for users, refresh tokens, and password reset tokens.
//!
//! Handlers only ever see the [`CredentialStore`] and [`TokenStore`] traits;
//! the concrete backend (Postgres or the JSON users file) is selected once at
//! startup and injected as trait objects.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod file;
pub mod postgres;

/// Backend selected for the process lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Database,
    File,
}

impl StorageBackend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::File => "file",
        }
    }
}

/// Account role carried into access-token claims.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// A stored account.
///
/// The password hash is bcrypt output and never appears in API responses or
/// logs; it only changes through [`CredentialStore::set_password`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub preferences: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Check a candidate password against the stored hash.
    ///
    /// Never fails: empty candidates and malformed hashes verify as `false`.
    #[must_use]
    pub fn verify_password(&self, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }
        bcrypt::verify(candidate, &self.password_hash).unwrap_or(false)
    }
}

/// Hash a plaintext password for storage.
///
/// # Errors
///
/// Returns an error if bcrypt fails to produce a hash.
pub fn hash_password(plain: &str) -> Result<String> {
    bcrypt::hash(plain, bcrypt::DEFAULT_COST).context("failed to hash password")
}

/// Fields required to create an account. Callers hash the password first so
/// plaintext never crosses the store boundary.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Outcome when creating a user; duplicate usernames are not an I/O error.
#[derive(Debug)]
pub enum CreateOutcome {
    Created(User),
    Conflict,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn create(&self, new_user: NewUser) -> Result<CreateOutcome>;

    /// Replace the stored password hash. Returns `false` for unknown users.
    async fn set_password(&self, username: &str, password_hash: &str) -> Result<bool>;

    /// Delete an account. The caller is responsible for revoking the user's
    /// tokens in the same operation.
    async fn delete(&self, username: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<User>>;
}

/// A raw refresh token, returned exactly once at creation time.
#[derive(Debug)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// A raw password reset token, returned exactly once at creation time.
#[derive(Debug)]
pub struct IssuedResetToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// A refresh token as returned by [`TokenStore::find_valid_refresh_token`];
/// revoked and expired tokens never reach this type.
#[derive(Clone, Debug)]
pub struct RefreshTokenRecord {
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn create_refresh_token(
        &self,
        username: &str,
        ttl_days: i64,
    ) -> Result<IssuedRefreshToken>;

    /// Point lookup of a usable refresh token. Returns `None` uniformly for
    /// unknown, revoked, and expired tokens so callers cannot tell the cases
    /// apart.
    async fn find_valid_refresh_token(&self, token: &str) -> Result<Option<RefreshTokenRecord>>;

    /// Mark a refresh token revoked. Returns `false` only when the token is
    /// unknown; revoking an already-revoked token succeeds.
    async fn revoke_refresh_token(&self, token: &str) -> Result<bool>;

    /// Revoke every refresh token issued to a user; returns the count.
    async fn revoke_all_for_user(&self, username: &str) -> Result<u64>;

    /// Garbage-collect expired refresh tokens and used/expired reset tokens.
    /// Safe to call repeatedly and concurrently.
    async fn remove_expired(&self) -> Result<u64>;

    /// Create a reset token, invalidating any prior tokens for the user so
    /// at most one valid token exists per user.
    async fn create_reset_token(
        &self,
        username: &str,
        ttl_minutes: i64,
    ) -> Result<IssuedResetToken>;

    /// Consume a reset token, returning the username it was issued to.
    /// A token can be consumed exactly once; used, expired, and unknown
    /// tokens all return `None`.
    async fn consume_reset_token(&self, token: &str) -> Result<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::{hash_password, Role, StorageBackend, User};
    use chrono::Utc;
    use uuid::Uuid;

    fn user_with_password(plain: &str) -> User {
        User {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            password_hash: hash_password(plain).expect("hash"),
            role: Role::User,
            email: None,
            display_name: None,
            preferences: serde_json::Value::Object(serde_json::Map::new()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn verify_password_accepts_the_registered_password() {
        let user = user_with_password("correct horse");
        assert!(user.verify_password("correct horse"));
    }

    #[test]
    fn verify_password_rejects_wrong_empty_and_garbage_input() {
        let mut user = user_with_password("correct horse");
        assert!(!user.verify_password("wrong horse"));
        assert!(!user.verify_password(""));

        // A corrupted stored hash must fail closed, not error.
        user.password_hash = "not-a-bcrypt-hash".to_string();
        assert!(!user.verify_password("correct horse"));
    }

    #[test]
    fn role_round_trips_through_text() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert_eq!(Role::parse("root"), None);
        assert_eq!(Role::Admin.as_str(), "admin");
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Role::Admin).expect("serialize"),
            "\"admin\""
        );
    }

    #[test]
    fn storage_backend_names() {
        assert_eq!(StorageBackend::Database.as_str(), "database");
        assert_eq!(StorageBackend::File.as_str(), "file");
    }
}
