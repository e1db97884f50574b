mod adapters;
mod bootstrap;
mod config;
mod error;
mod healthcheck;
mod ledger;
mod sync;

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

// Initialize logging and tracing
fn init_tracing() {
    let filter = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Resolves on Ctrl-C or, on unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };

    if std::env::args().nth(1).as_deref() == Some("healthcheck") {
        let probe = match bootstrap::initialize_clients(&config) {
            Ok((identity, rooms)) => healthcheck::run_probe(identity, rooms).await,
            Err(e) => Err(e.into()),
        };
        return match probe {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{:#}", e);
                ExitCode::FAILURE
            }
        };
    }

    info!("🚀 Starting roster sync");

    let scheduler = match bootstrap::initialize_app_state(&config).await {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("❌ Startup failed: {}", e);
            if let Some(hint) = e.guidance() {
                error!("Hint: {}", hint);
            }
            return ExitCode::FAILURE;
        }
    };

    scheduler.run_until(shutdown_signal()).await;

    info!("👋 Roster sync stopped");
    ExitCode::SUCCESS
}
