//! Runtime configuration resolved from CLI arguments and the environment.

use secrecy::SecretString;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct GlobalArgs {
    pub dsn: Option<String>,
    pub use_database: bool,
    pub users_file: PathBuf,
    pub jwt_secret: SecretString,
    pub access_token_expiry_seconds: u64,
    pub refresh_token_expiry_days: i64,
    pub enable_account_lockout: bool,
    pub enable_refresh_tokens: bool,
    pub production: bool,
    pub cors_origin: String,
}
