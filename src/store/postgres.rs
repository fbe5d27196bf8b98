//! Postgres-backed store.
//!
//! Schema lives in `sql/schema.sql`. Every query runs inside a `db.query`
//! span so traces show the statement being executed.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use std::time::Duration;
use tracing::Instrument;

use super::{
    CreateOutcome, CredentialStore, IssuedRefreshToken, IssuedResetToken, NewUser,
    RefreshTokenRecord, Role, TokenStore, User,
};
use crate::token::{generate_token, hash_token};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Postgres implementation of both store traits.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with the startup probe timeout. A failure here is what sends
    /// the server action to the file backend.
    ///
    /// # Errors
    ///
    /// Returns an error when no connection can be established within the
    /// probe timeout.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .acquire_timeout(CONNECT_TIMEOUT)
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }
}

fn query_span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn row_to_user(row: &PgRow) -> Result<User> {
    let role: String = row.get("role");
    let role = Role::parse(&role).ok_or_else(|| anyhow!("unknown role {role}"))?;
    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        role,
        email: row.get("email"),
        display_name: row.get("display_name"),
        preferences: row.get("preferences"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

const USER_COLUMNS: &str = "id, username, password_hash, role, email, display_name, \
                            preferences, created_at, updated_at";

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let row = sqlx::query(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .context("failed to lookup user by username")?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1 LIMIT 1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .context("failed to lookup user by email")?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn create(&self, new_user: NewUser) -> Result<CreateOutcome> {
        let query = format!(
            "INSERT INTO users (username, password_hash, role, email, display_name) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&new_user.username)
            .bind(&new_user.password_hash)
            .bind(new_user.role.as_str())
            .bind(&new_user.email)
            .bind(&new_user.display_name)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", &query))
            .await;

        match row {
            Ok(row) => Ok(CreateOutcome::Created(row_to_user(&row)?)),
            Err(err) if is_unique_violation(&err) => Ok(CreateOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn set_password(&self, username: &str, password_hash: &str) -> Result<bool> {
        let query = "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE username = $1";
        let result = sqlx::query(query)
            .bind(username)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update password hash")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, username: &str) -> Result<bool> {
        let query = "DELETE FROM users WHERE username = $1";
        let result = sqlx::query(query)
            .bind(username)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete user")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .context("failed to list users")?;
        rows.iter().map(row_to_user).collect()
    }
}

#[async_trait]
impl TokenStore for PostgresStore {
    async fn create_refresh_token(
        &self,
        username: &str,
        ttl_days: i64,
    ) -> Result<IssuedRefreshToken> {
        let query = r"
            INSERT INTO refresh_tokens (token_hash, username, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 day'))
            RETURNING expires_at
        ";

        // Digest collisions are astronomically unlikely; retry a couple of
        // times anyway rather than failing the login.
        for _ in 0..3 {
            let token = generate_token()?;
            let result = sqlx::query(query)
                .bind(hash_token(&token))
                .bind(username)
                .bind(ttl_days)
                .fetch_one(&self.pool)
                .instrument(query_span("INSERT", query))
                .await;

            match result {
                Ok(row) => {
                    let expires_at: DateTime<Utc> = row.get("expires_at");
                    return Ok(IssuedRefreshToken { token, expires_at });
                }
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => return Err(err).context("failed to insert refresh token"),
            }
        }

        Err(anyhow!("failed to generate unique refresh token"))
    }

    async fn find_valid_refresh_token(&self, token: &str) -> Result<Option<RefreshTokenRecord>> {
        let query = r"
            SELECT username, created_at, expires_at
            FROM refresh_tokens
            WHERE token_hash = $1
              AND NOT is_revoked
              AND expires_at > NOW()
        ";
        let row = sqlx::query(query)
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup refresh token")?;
        Ok(row.map(|row| RefreshTokenRecord {
            username: row.get("username"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        }))
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<bool> {
        let query = "UPDATE refresh_tokens SET is_revoked = TRUE WHERE token_hash = $1";
        let result = sqlx::query(query)
            .bind(hash_token(token))
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to revoke refresh token")?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(&self, username: &str) -> Result<u64> {
        let query =
            "UPDATE refresh_tokens SET is_revoked = TRUE WHERE username = $1 AND NOT is_revoked";
        let result = sqlx::query(query)
            .bind(username)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to revoke refresh tokens")?;
        Ok(result.rows_affected())
    }

    async fn remove_expired(&self) -> Result<u64> {
        let query = "DELETE FROM refresh_tokens WHERE expires_at <= NOW()";
        let refresh = sqlx::query(query)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to sweep refresh tokens")?;

        let query = "DELETE FROM password_reset_tokens WHERE is_used OR expires_at <= NOW()";
        let reset = sqlx::query(query)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to sweep reset tokens")?;

        Ok(refresh.rows_affected() + reset.rows_affected())
    }

    async fn create_reset_token(
        &self,
        username: &str,
        ttl_minutes: i64,
    ) -> Result<IssuedResetToken> {
        // Invalidate priors and insert the replacement atomically so the
        // one-valid-token-per-user invariant holds under concurrent requests.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin reset token transaction")?;

        let query =
            "UPDATE password_reset_tokens SET is_used = TRUE WHERE username = $1 AND NOT is_used";
        sqlx::query(query)
            .bind(username)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to invalidate prior reset tokens")?;

        let token = generate_token()?;
        let query = r"
            INSERT INTO password_reset_tokens (token_hash, username, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 minute'))
            RETURNING expires_at
        ";
        let row = sqlx::query(query)
            .bind(hash_token(&token))
            .bind(username)
            .bind(ttl_minutes)
            .fetch_one(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert reset token")?;
        let expires_at: DateTime<Utc> = row.get("expires_at");

        tx.commit().await.context("commit reset token transaction")?;
        Ok(IssuedResetToken { token, expires_at })
    }

    async fn consume_reset_token(&self, token: &str) -> Result<Option<String>> {
        let query = r"
            UPDATE password_reset_tokens
            SET is_used = TRUE
            WHERE token_hash = $1
              AND NOT is_used
              AND expires_at > NOW()
            RETURNING username
        ";
        let row = sqlx::query(query)
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to consume reset token")?;
        Ok(row.map(|row| row.get("username")))
    }
}
