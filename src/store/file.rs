//! JSON-file-backed store.
//!
//! The whole state is loaded into memory at startup and the file is rewritten
//! wholesale on every mutation. Writes are serialized within the process by
//! the state lock, but two processes sharing one file will lose updates:
//! this backend is a hard single-instance constraint, not a soft default.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::{
    CreateOutcome, CredentialStore, IssuedRefreshToken, IssuedResetToken, NewUser,
    RefreshTokenRecord, TokenStore, User,
};
use crate::token::{generate_token, hash_token};

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileState {
    #[serde(default)]
    users: Vec<User>,
    /// Keyed by token digest; raw tokens never touch the file.
    #[serde(default)]
    refresh_tokens: HashMap<String, StoredRefreshToken>,
    #[serde(default)]
    password_reset_tokens: HashMap<String, StoredResetToken>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredRefreshToken {
    username: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_revoked: bool,
}

impl StoredRefreshToken {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && now < self.expires_at
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredResetToken {
    username: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_used: bool,
}

/// File-backed implementation of both store traits.
#[derive(Clone)]
pub struct FileStore {
    path: PathBuf,
    state: Arc<Mutex<FileState>>,
}

impl FileStore {
    /// Load the users file, creating the parent directory if needed. A
    /// missing file starts empty; a corrupt file is an error rather than a
    /// silent reset.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("invalid users file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => FileState::default(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read users file {}", path.display()))
            }
        };

        info!(
            users = state.users.len(),
            "Loaded users file {}",
            path.display()
        );

        Ok(Self {
            path,
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Rewrite the whole file via a temp-file rename. Callers hold the state
    /// lock for the duration, so writes cannot interleave in-process.
    async fn persist(path: &Path, state: &FileState) -> Result<()> {
        let json =
            serde_json::to_string_pretty(state).context("failed to serialize users file")?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .iter()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .iter()
            .find(|user| user.email.as_deref() == Some(email))
            .cloned())
    }

    async fn create(&self, new_user: NewUser) -> Result<CreateOutcome> {
        let mut state = self.state.lock().await;
        if state
            .users
            .iter()
            .any(|user| user.username == new_user.username)
        {
            return Ok(CreateOutcome::Conflict);
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            password_hash: new_user.password_hash,
            role: new_user.role,
            email: new_user.email,
            display_name: new_user.display_name,
            preferences: serde_json::Value::Object(serde_json::Map::new()),
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());
        Self::persist(&self.path, &state).await?;
        Ok(CreateOutcome::Created(user))
    }

    async fn set_password(&self, username: &str, password_hash: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(user) = state
            .users
            .iter_mut()
            .find(|user| user.username == username)
        else {
            return Ok(false);
        };
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Self::persist(&self.path, &state).await?;
        Ok(true)
    }

    async fn delete(&self, username: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let before = state.users.len();
        state.users.retain(|user| user.username != username);
        if state.users.len() == before {
            return Ok(false);
        }
        Self::persist(&self.path, &state).await?;
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<User>> {
        let state = self.state.lock().await;
        Ok(state.users.clone())
    }
}

#[async_trait]
impl TokenStore for FileStore {
    async fn create_refresh_token(
        &self,
        username: &str,
        ttl_days: i64,
    ) -> Result<IssuedRefreshToken> {
        let token = generate_token()?;
        let now = Utc::now();
        let expires_at = now + Duration::days(ttl_days);

        let mut state = self.state.lock().await;
        state.refresh_tokens.insert(
            hash_token(&token),
            StoredRefreshToken {
                username: username.to_string(),
                created_at: now,
                expires_at,
                is_revoked: false,
            },
        );
        Self::persist(&self.path, &state).await?;
        Ok(IssuedRefreshToken { token, expires_at })
    }

    async fn find_valid_refresh_token(&self, token: &str) -> Result<Option<RefreshTokenRecord>> {
        let now = Utc::now();
        let state = self.state.lock().await;
        Ok(state
            .refresh_tokens
            .get(&hash_token(token))
            .filter(|stored| stored.is_valid(now))
            .map(|stored| RefreshTokenRecord {
                username: stored.username.clone(),
                created_at: stored.created_at,
                expires_at: stored.expires_at,
            }))
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(stored) = state.refresh_tokens.get_mut(&hash_token(token)) else {
            return Ok(false);
        };
        if !stored.is_revoked {
            stored.is_revoked = true;
            Self::persist(&self.path, &state).await?;
        }
        Ok(true)
    }

    async fn revoke_all_for_user(&self, username: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut revoked = 0u64;
        for stored in state.refresh_tokens.values_mut() {
            if stored.username == username && !stored.is_revoked {
                stored.is_revoked = true;
                revoked += 1;
            }
        }
        if revoked > 0 {
            Self::persist(&self.path, &state).await?;
        }
        Ok(revoked)
    }

    async fn remove_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let before =
            state.refresh_tokens.len() + state.password_reset_tokens.len();
        state
            .refresh_tokens
            .retain(|_, stored| now < stored.expires_at);
        state
            .password_reset_tokens
            .retain(|_, stored| !stored.is_used && now < stored.expires_at);
        let removed = before
            - (state.refresh_tokens.len() + state.password_reset_tokens.len());
        if removed > 0 {
            Self::persist(&self.path, &state).await?;
        }
        Ok(u64::try_from(removed).unwrap_or(u64::MAX))
    }

    async fn create_reset_token(
        &self,
        username: &str,
        ttl_minutes: i64,
    ) -> Result<IssuedResetToken> {
        let token = generate_token()?;
        let now = Utc::now();
        let expires_at = now + Duration::minutes(ttl_minutes);

        let mut state = self.state.lock().await;
        // At most one valid reset token per user: invalidate priors first.
        for stored in state.password_reset_tokens.values_mut() {
            if stored.username == username {
                stored.is_used = true;
            }
        }
        state.password_reset_tokens.insert(
            hash_token(&token),
            StoredResetToken {
                username: username.to_string(),
                created_at: now,
                expires_at,
                is_used: false,
            },
        );
        Self::persist(&self.path, &state).await?;
        Ok(IssuedResetToken { token, expires_at })
    }

    async fn consume_reset_token(&self, token: &str) -> Result<Option<String>> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let Some(stored) = state.password_reset_tokens.get_mut(&hash_token(token)) else {
            return Ok(None);
        };
        if stored.is_used || now >= stored.expires_at {
            return Ok(None);
        }
        stored.is_used = true;
        let username = stored.username.clone();
        Self::persist(&self.path, &state).await?;
        Ok(Some(username))
    }
}
