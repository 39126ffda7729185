use std::time::Duration;

use anyhow::{Context, Result};
use hostsleep_id::WorkerId;
use hostsleep_reconcile::{
    DEFAULT_ACTION_TIMEOUT, DEFAULT_LEASE_DURATION, DEFAULT_RECONCILE_INTERVAL,
};

use crate::db::DbConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub dev_mode: bool,
    pub tick_interval: Duration,
    pub action_timeout: Duration,
    pub lease_duration: Duration,
    pub worker_id: WorkerId,
    pub database: DbConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let log_level =
            std::env::var("HOSTSLEEP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("HOSTSLEEP_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let tick_interval =
            duration_secs("HOSTSLEEP_TICK_INTERVAL_SECS", DEFAULT_RECONCILE_INTERVAL)?;
        let action_timeout =
            duration_secs("HOSTSLEEP_ACTION_TIMEOUT_SECS", DEFAULT_ACTION_TIMEOUT)?;
        let lease_duration =
            duration_secs("HOSTSLEEP_LEASE_DURATION_SECS", DEFAULT_LEASE_DURATION)?;

        let worker_id = match std::env::var("HOSTSLEEP_WORKER_ID") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("invalid HOSTSLEEP_WORKER_ID '{raw}'"))?,
            Err(_) => WorkerId::new(),
        };

        let database = DbConfig::from_env();

        Ok(Self {
            log_level,
            dev_mode,
            tick_interval,
            action_timeout,
            lease_duration,
            worker_id,
            database,
        })
    }
}

fn duration_secs(var: &str, default: Duration) -> Result<Duration> {
    match std::env::var(var) {
        Ok(raw) => {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("invalid {var} '{raw}'"))?;
            anyhow::ensure!(secs > 0, "{var} must be positive");
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}
