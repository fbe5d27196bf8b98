//! # Sesio (Session & Token Lifecycle)
//!
//! `sesio` issues and tracks the credentials that keep a signed-in session
//! alive: short-lived signed access tokens and long-lived, server-tracked,
//! revocable refresh tokens.
//!
//! ## Tokens
//!
//! - **Access tokens** are stateless `HS256` JWTs carrying the username and
//!   role. Validity is purely cryptographic plus an expiry check.
//! - **Refresh tokens** are opaque random values. Only a SHA-256 digest is
//!   persisted; the raw token is handed to the client exactly once, inside
//!   an `HttpOnly` cookie scoped to the refresh endpoint.
//! - **Password reset tokens** follow the same opaque/hashed scheme, are
//!   single use, and at most one valid token exists per user at any time.
//!
//! ## Storage
//!
//! Handlers depend on the [`store::CredentialStore`] and [`store::TokenStore`]
//! traits only. The backend is chosen once at startup: Postgres when
//! `USE_DATABASE` is set and the connection probe succeeds, otherwise a JSON
//! users file. A failed probe logs a warning and falls back to the file for
//! the remainder of the process lifetime; there is no upgrade back to the
//! database without a restart.
//!
//! > **Warning:** the file backend rewrites the whole file on every mutation
//! > and is only safe with a single service instance.

pub mod api;
pub mod cli;
pub mod store;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
