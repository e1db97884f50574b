// Collaborator health checks: retried at startup, single-shot for the
// `healthcheck` subcommand used by container probes.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::adapters::traits::{IdentityProvider, RoomDirectory};
use crate::error::{AppError, AppResult};

/// Check both collaborators once. Both are always checked so the logs show every failure.
pub async fn check_once(
    identity: &dyn IdentityProvider,
    rooms: &dyn RoomDirectory,
) -> AppResult<()> {
    let identity_result = identity.check_health().await;
    let rooms_result = rooms.check_health().await;

    let mut failures = Vec::new();
    for (name, result) in [(identity.name(), identity_result), (rooms.name(), rooms_result)] {
        if let Err(e) = result {
            warn!("{} check failed: {}", name, e);
            if !e.is_transient() {
                if let Some(hint) = e.guidance() {
                    warn!("Hint: {}", hint);
                }
            }
            failures.push(format!("{}: {}", name, e));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(AppError::Connectivity(failures.join("; ")))
    }
}

/// Retry `check_once` with a fixed delay until it passes or `attempts` run out
pub async fn wait_until_healthy(
    identity: Arc<dyn IdentityProvider>,
    rooms: Arc<dyn RoomDirectory>,
    attempts: u32,
    delay: Duration,
) -> AppResult<()> {
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        info!("🩺 Checking connectivity (attempt {}/{})", attempt, attempts);

        match check_once(identity.as_ref(), rooms.as_ref()).await {
            Ok(()) => {
                info!("✅ {} and {} are reachable", identity.name(), rooms.name());
                return Ok(());
            }
            Err(e) if attempt < attempts => {
                warn!(
                    attempt = attempt,
                    wait_secs = delay.as_secs(),
                    "Startup check failed, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!("❌ Startup checks failed after {} attempts", attempts);
                return Err(AppError::Connectivity(format!(
                    "startup checks failed after {} attempts: {}",
                    attempts, e
                )));
            }
        }
    }
}

/// Entry point of `roster-sync healthcheck`
pub async fn run_probe(
    identity: Arc<dyn IdentityProvider>,
    rooms: Arc<dyn RoomDirectory>,
) -> anyhow::Result<()> {
    check_once(identity.as_ref(), rooms.as_ref())
        .await
        .context("health check failed")?;
    println!("Healthy");
    Ok(())
}
