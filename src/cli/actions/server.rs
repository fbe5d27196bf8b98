//! Server action: pick the storage backend, assemble state, run the API.

use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

use crate::{
    api::{
        self, AuthConfig, AuthState, FailedLoginLimiter, NoopRateLimiter, RateLimiter,
        LOGIN_ATTEMPT_LIMIT, LOGIN_ATTEMPT_WINDOW,
    },
    cli::{actions::Action, globals::GlobalArgs},
    store::{
        file::FileStore, hash_password, postgres::PostgresStore, CreateOutcome, CredentialStore,
        NewUser, Role, StorageBackend, TokenStore,
    },
    token::TokenIssuer,
};

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Handle the server action.
///
/// # Errors
///
/// Returns an error when neither backend can be opened or the listener fails.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server { port, globals } = action;

    let (backend, credentials, tokens) = select_stores(&globals).await?;

    ensure_default_admin(credentials.as_ref()).await?;
    spawn_expiry_sweeper(tokens.clone());

    // Lockout state is in-process; with several replicas each one counts
    // failures independently.
    let rate_limiter: Arc<dyn RateLimiter> = if globals.enable_account_lockout {
        Arc::new(FailedLoginLimiter::new(
            LOGIN_ATTEMPT_WINDOW,
            LOGIN_ATTEMPT_LIMIT,
        ))
    } else {
        Arc::new(NoopRateLimiter)
    };

    let config = AuthConfig::new(globals.cors_origin.clone())
        .with_access_token_ttl_seconds(globals.access_token_expiry_seconds)
        .with_refresh_token_ttl_days(globals.refresh_token_expiry_days)
        .with_refresh_tokens_enabled(globals.enable_refresh_tokens)
        .with_production(globals.production);

    let issuer = TokenIssuer::new(&globals.jwt_secret, globals.access_token_expiry_seconds);

    let state = Arc::new(AuthState::new(
        config,
        issuer,
        backend,
        credentials,
        tokens,
        rate_limiter,
    ));

    api::new(port, state).await
}

/// Decide the storage backend once for the process lifetime. A failed
/// database probe falls back to the users file with a warning; there is no
/// upgrade back to the database without a restart.
async fn select_stores(
    globals: &GlobalArgs,
) -> Result<(StorageBackend, Arc<dyn CredentialStore>, Arc<dyn TokenStore>)> {
    if globals.use_database {
        if let Some(dsn) = &globals.dsn {
            match PostgresStore::connect(dsn).await {
                Ok(store) => {
                    info!("Using database for data storage");
                    let store = Arc::new(store);
                    return Ok((StorageBackend::Database, store.clone(), store));
                }
                Err(err) => {
                    warn!("Database unavailable, falling back to users file: {err:#}");
                }
            }
        } else {
            warn!("USE_DATABASE set without SESIO_DSN, falling back to users file");
        }
    } else {
        info!("Using JSON file for data storage");
    }

    let store = Arc::new(FileStore::open(&globals.users_file).await?);
    Ok((StorageBackend::File, store.clone(), store))
}

/// Seed the default admin account on an empty store so a fresh deployment is
/// reachable.
async fn ensure_default_admin(credentials: &dyn CredentialStore) -> Result<()> {
    if credentials.find_by_username("admin").await?.is_some() {
        return Ok(());
    }

    let password_hash = hash_password("admin123")?;
    match credentials
        .create(NewUser {
            username: "admin".to_string(),
            password_hash,
            role: Role::Admin,
            email: Some("admin@example.com".to_string()),
            display_name: None,
        })
        .await?
    {
        CreateOutcome::Created(_) => {
            warn!("Seeded default admin user with a well-known password; change it now");
        }
        // Another replica won the race; nothing to do.
        CreateOutcome::Conflict => {}
    }
    Ok(())
}

/// Periodic garbage collection of expired refresh tokens and used/expired
/// reset tokens.
fn spawn_expiry_sweeper(tokens: Arc<dyn TokenStore>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        // The first tick completes immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match tokens.remove_expired().await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Removed expired tokens"),
                Err(err) => error!("Expiry sweep failed: {err:#}"),
            }
        }
    });
}
