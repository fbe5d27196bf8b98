//! Session lifecycle handlers: login, refresh, logout, and password flows.
//!
//! ## Login lockout
//!
//! Failed logins are counted per client in a 15-minute sliding window; the
//! sixth attempt is rejected with 429 even when its credentials are correct.
//! `ENABLE_ACCOUNT_LOCKOUT=false` swaps in the no-op limiter.
//!
//! ## Token handling
//!
//! Access tokens are stateless JWTs. Refresh tokens are opaque, stored
//! hashed, and re-checked against the store on every use, so revocation
//! takes effect immediately regardless of what a client has cached.

pub(crate) mod login;
pub(crate) mod password;
pub(crate) mod principal;
mod rate_limit;
pub(crate) mod session;
mod state;
pub(crate) mod types;
pub(crate) mod utils;

pub use rate_limit::{
    FailedLoginLimiter, NoopRateLimiter, RateLimiter, LOGIN_ATTEMPT_LIMIT, LOGIN_ATTEMPT_WINDOW,
};
pub use state::{AuthConfig, AuthState};
