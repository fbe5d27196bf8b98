use crate::cli::{actions::Action, globals::GlobalArgs};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let globals = GlobalArgs {
        dsn: matches.get_one::<String>("dsn").cloned(),
        use_database: matches
            .get_one::<bool>("use-database")
            .copied()
            .unwrap_or(false),
        users_file: matches
            .get_one::<PathBuf>("users-file")
            .cloned()
            .context("missing users file path")?,
        jwt_secret: SecretString::from(
            matches
                .get_one::<String>("jwt-secret")
                .cloned()
                .context("missing JWT secret")?,
        ),
        access_token_expiry_seconds: matches
            .get_one::<u64>("access-token-expiry")
            .copied()
            .unwrap_or(3600),
        refresh_token_expiry_days: matches
            .get_one::<i64>("refresh-token-expiry")
            .copied()
            .unwrap_or(7),
        enable_account_lockout: matches
            .get_one::<bool>("enable-account-lockout")
            .copied()
            .unwrap_or(true),
        enable_refresh_tokens: matches
            .get_one::<bool>("enable-refresh-tokens")
            .copied()
            .unwrap_or(true),
        production: matches.get_one::<bool>("production").copied().unwrap_or(false),
        cors_origin: matches
            .get_one::<String>("cors-origin")
            .cloned()
            .context("missing CORS origin")?,
    };

    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8097),
        globals,
    })
}
