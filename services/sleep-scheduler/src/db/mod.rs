//! Postgres persistence for the sleep scheduler.
//!
//! [`Database`] owns the pool and hands out one store per collaborator trait:
//! hosts, settings, the job queue, leases and the tick ledger. Queries are
//! built at runtime with SQLx, so no database is needed at compile time.

mod coordination;
mod error;
mod hosts;
mod queue;
mod settings;

pub use coordination::{PgLeaseStore, PgTickLedger};
pub use error::DbError;
pub use hosts::PgHostStore;
pub use queue::PgJobQueue;
pub use settings::PgSettingsSource;

use std::path::PathBuf;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

/// Pool settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/hostsleep".to_string(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Read `DATABASE_URL`, `DB_MAX_CONNECTIONS` and `DB_MIN_CONNECTIONS`,
    /// keeping defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(max) = env_u32("DB_MAX_CONNECTIONS") {
            config.max_connections = max;
        }
        if let Some(min) = env_u32("DB_MIN_CONNECTIONS") {
            config.min_connections = min;
        }
        config
    }
}

fn env_u32(var: &str) -> Option<u32> {
    std::env::var(var).ok()?.parse().ok()
}

/// Shared connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        info!(
            max_connections = config.max_connections,
            "Connected to database"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    /// Apply the SQL migrations shipped with the service.
    ///
    /// Migrations are read from disk at runtime; the working directory may be
    /// the repo root or the service directory.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let searched = vec![
            PathBuf::from("migrations"),
            PathBuf::from("services/sleep-scheduler/migrations"),
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];

        for dir in &searched {
            let migrator = match Migrator::new(dir.clone()).await {
                Ok(migrator) => migrator,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "No migrations here");
                    continue;
                }
            };
            migrator.run(&self.pool).await.map_err(DbError::Migration)?;
            info!(dir = %dir.display(), "Database migrations applied");
            return Ok(());
        }

        Err(DbError::MigrationsNotFound { searched })
    }

    pub fn host_store(&self) -> PgHostStore {
        PgHostStore::new(self.pool.clone())
    }

    pub fn settings_source(&self) -> PgSettingsSource {
        PgSettingsSource::new(self.pool.clone())
    }

    pub fn job_queue(&self) -> PgJobQueue {
        PgJobQueue::new(self.pool.clone())
    }

    pub fn lease_store(&self) -> PgLeaseStore {
        PgLeaseStore::new(self.pool.clone())
    }

    pub fn tick_ledger(&self) -> PgTickLedger {
        PgTickLedger::new(self.pool.clone())
    }
}
