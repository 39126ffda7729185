//! Host sleep scheduler
//!
//! Periodically repairs host sleep schedules and enqueues the stop/start
//! jobs for hosts that are due.

use std::sync::Arc;

use anyhow::Result;
use hostsleep_scheduler::{
    config,
    context::TickContext,
    db::Database,
    scheduler::{SleepScheduleReconciler, SleepSchedulerWorker, WorkerConfig},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to HOSTSLEEP_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting host sleep scheduler");
    info!(
        worker_id = %config.worker_id,
        tick_interval_secs = config.tick_interval.as_secs(),
        action_timeout_secs = config.action_timeout.as_secs(),
        "Configuration loaded"
    );

    let db = match Database::connect(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    // Run migrations in dev mode
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    let ctx = TickContext::new(
        Arc::new(db.host_store()),
        Arc::new(db.settings_source()),
        Arc::new(db.job_queue()),
    )
    .with_action_timeout(config.action_timeout);

    let worker = SleepSchedulerWorker::new(
        SleepScheduleReconciler::new(ctx),
        Arc::new(db.lease_store()),
        Arc::new(db.tick_ledger()),
        WorkerConfig {
            worker_id: config.worker_id,
            interval: config.tick_interval,
            lease_duration: config.lease_duration,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(async move {
        worker.run(shutdown_rx).await;
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);

    let shutdown_timeout = std::time::Duration::from_secs(10);
    match tokio::time::timeout(shutdown_timeout, worker_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Sleep scheduler worker panicked"),
        Err(e) => warn!(error = %e, "Sleep scheduler worker did not shut down in time"),
    }

    info!("Sleep scheduler shutdown complete");
    Ok(())
}
