//! Shared state and configuration for the session handlers.

use std::sync::Arc;

use super::rate_limit::RateLimiter;
use crate::{
    store::{CredentialStore, StorageBackend, TokenStore},
    token::TokenIssuer,
};

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 7;
const DEFAULT_RESET_TOKEN_TTL_MINUTES: i64 = 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_origin: String,
    access_token_ttl_seconds: u64,
    refresh_token_ttl_days: i64,
    reset_token_ttl_minutes: i64,
    refresh_tokens_enabled: bool,
    production: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_origin: String) -> Self {
        Self {
            frontend_origin,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_days: DEFAULT_REFRESH_TOKEN_TTL_DAYS,
            reset_token_ttl_minutes: DEFAULT_RESET_TOKEN_TTL_MINUTES,
            refresh_tokens_enabled: true,
            production: false,
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_days(mut self, days: i64) -> Self {
        self.refresh_token_ttl_days = days;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_minutes(mut self, minutes: i64) -> Self {
        self.reset_token_ttl_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_refresh_tokens_enabled(mut self, enabled: bool) -> Self {
        self.refresh_tokens_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    #[must_use]
    pub fn frontend_origin(&self) -> &str {
        &self.frontend_origin
    }

    #[must_use]
    pub const fn access_token_ttl_seconds(&self) -> u64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub const fn refresh_token_ttl_days(&self) -> i64 {
        self.refresh_token_ttl_days
    }

    #[must_use]
    pub const fn reset_token_ttl_minutes(&self) -> i64 {
        self.reset_token_ttl_minutes
    }

    #[must_use]
    pub const fn refresh_tokens_enabled(&self) -> bool {
        self.refresh_tokens_enabled
    }

    /// In production the raw reset token is never echoed back and cookies
    /// are marked `Secure`.
    #[must_use]
    pub const fn production(&self) -> bool {
        self.production
    }

    pub(super) const fn cookie_secure(&self) -> bool {
        self.production
    }
}

/// Everything the session handlers need, injected once at startup.
pub struct AuthState {
    config: AuthConfig,
    issuer: TokenIssuer,
    backend: StorageBackend,
    credentials: Arc<dyn CredentialStore>,
    tokens: Arc<dyn TokenStore>,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        issuer: TokenIssuer,
        backend: StorageBackend,
        credentials: Arc<dyn CredentialStore>,
        tokens: Arc<dyn TokenStore>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            issuer,
            backend,
            credentials,
            tokens,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    #[must_use]
    pub const fn backend(&self) -> StorageBackend {
        self.backend
    }

    pub(crate) fn credentials(&self) -> &dyn CredentialStore {
        self.credentials.as_ref()
    }

    pub(crate) fn tokens(&self) -> &dyn TokenStore {
        self.tokens.as_ref()
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}
