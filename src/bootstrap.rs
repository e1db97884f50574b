use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use crate::{
    adapters::{AuthentikClient, AuthentikConfig, IdentityProvider, MatrixClient, MatrixConfig, RoomDirectory},
    config::Config,
    error::AppResult,
    healthcheck,
    ledger::{BackupManager, LedgerRepository},
    sync::{Reconciler, SyncScheduler, SyncSettings},
};

/// HTTP clients for the identity provider and the homeserver
pub fn initialize_clients(
    config: &Config,
) -> AppResult<(Arc<dyn IdentityProvider>, Arc<dyn RoomDirectory>)> {
    let identity = AuthentikClient::new(AuthentikConfig {
        base_url: config.authentik_url.clone(),
        token: config.authentik_token.clone(),
        fallback_domain: config.fallback_domain().to_string(),
        timeout: config.http_timeout,
    })?;
    info!("✅ Authentik client ready for {}", config.authentik_url);

    let rooms = MatrixClient::new(MatrixConfig {
        homeserver_url: config.matrix_homeserver_url.clone(),
        access_token: config.matrix_access_token.clone(),
        user_id: config.matrix_user_id.clone(),
        timeout: config.http_timeout,
    })?;
    info!(
        "✅ Matrix client ready for {} as {}",
        config.matrix_homeserver_url, config.matrix_user_id
    );

    Ok((Arc::new(identity), Arc::new(rooms)))
}

/// Wire every component together and return the loop ready to run
pub async fn initialize_app_state(config: &Config) -> AppResult<SyncScheduler> {
    info!("Initializing application components ...");

    let (identity, rooms) = initialize_clients(config)?;

    healthcheck::wait_until_healthy(
        identity.clone(),
        rooms.clone(),
        config.startup_check_attempts,
        config.startup_check_delay,
    )
    .await?;

    let pool = initialize_database(&config.database_path).await?;
    let ledger = Arc::new(LedgerRepository::new(pool));

    let carried_over = ledger.count().await?;
    if carried_over > 0 {
        info!("📋 {} pending removals carried over from the last run", carried_over);
    }

    let backups = Arc::new(BackupManager::new(
        &config.database_path,
        config.backup_retention,
    ));
    info!(
        "✅ Ledger backups enabled (keeping {})",
        backups.retention()
    );

    let targets: Vec<_> = config
        .mappings
        .iter()
        .map(|mapping| mapping.resolve(&config.defaults))
        .collect();

    info!("📋 Configured mappings:");
    for target in &targets {
        info!(
            "   {} → {} ({}, grace {} min, {})",
            target.group,
            target.room,
            target.join_method,
            target.grace_period.num_minutes(),
            target.remove_action
        );
    }

    let reconciler = Arc::new(Reconciler::new(
        identity,
        rooms,
        ledger,
        backups,
        SyncSettings {
            targets,
            own_id: config.matrix_user_id.clone(),
            removal_reason: config.removal_reason.clone(),
        },
    ));

    Ok(SyncScheduler::new(config.sync_interval, reconciler))
}

/// Open (creating if needed) the ledger file and apply migrations
pub async fn initialize_database(path: &Path) -> AppResult<SqlitePool> {
    info!("📊 Opening ledger at {}...", path.display());

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Rollback journal with full sync: every commit is in the main file,
    // so a plain file copy is a consistent backup.
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .synchronous(SqliteSynchronous::Full);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await?;

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Ledger initialized");
    Ok(pool)
}
