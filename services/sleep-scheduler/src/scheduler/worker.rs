//! Sleep scheduler background worker.
//!
//! Runs the reconciliation tick on a periodic interval. Each tick holds the
//! deployment-wide `sleep-scheduler` lease while it runs, and is claimed in
//! the tick ledger so a time window is processed at most once.

use std::sync::Arc;
use std::time::Duration;

use hostsleep_id::WorkerId;
use hostsleep_reconcile::{DEFAULT_LEASE_DURATION, DEFAULT_RECONCILE_INTERVAL};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::reconciler::{
    SleepScheduleReconciler, Tick, TickError, TickReport, TickResult, SLEEP_SCHEDULER_JOB_NAME,
};
use crate::store::{LeaseStore, TickLedger, TickStatus};

/// Worker timing configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: WorkerId,
    /// Interval between ticks.
    pub interval: Duration,
    /// Lifetime of the lease; a tick running longer is abandoned.
    pub lease_duration: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: WorkerId::new(),
            interval: DEFAULT_RECONCILE_INTERVAL,
            lease_duration: DEFAULT_LEASE_DURATION,
        }
    }
}

/// Periodic driver for [`SleepScheduleReconciler`].
pub struct SleepSchedulerWorker {
    reconciler: SleepScheduleReconciler,
    leases: Arc<dyn LeaseStore>,
    ledger: Arc<dyn TickLedger>,
    config: WorkerConfig,
}

impl SleepSchedulerWorker {
    pub fn new(
        reconciler: SleepScheduleReconciler,
        leases: Arc<dyn LeaseStore>,
        ledger: Arc<dyn TickLedger>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            reconciler,
            leases,
            ledger,
            config,
        }
    }

    /// Run the worker until shutdown is signaled.
    ///
    /// Shutdown also cancels a tick that is in flight.
    #[instrument(skip(self, shutdown), fields(worker_id = %self.config.worker_id))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            lease_secs = self.config.lease_duration.as_secs(),
            "Starting sleep scheduler worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once(shutdown.clone()).await {
                        Ok(_) => {}
                        Err(TickError::Cancelled) => {}
                        Err(e) => error!(error = %e, "Sleep schedule tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Sleep scheduler worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single tick at the context clock's current time.
    ///
    /// Returns `Ok(None)` when another worker holds the lease or the tick's
    /// time window was already processed.
    pub async fn run_once(&self, cancel: watch::Receiver<bool>) -> TickResult<Option<TickReport>> {
        let reference = self.reconciler.context().clock.now();
        let tick = Tick::at(reference);

        let Some(lease) = self
            .leases
            .try_acquire(
                SLEEP_SCHEDULER_JOB_NAME,
                &self.config.worker_id,
                self.config.lease_duration,
                reference,
            )
            .await
            .map_err(TickError::Coordination)?
        else {
            debug!(tick_id = %tick.id, "Sleep scheduler lease held by another worker");
            return Ok(None);
        };

        let result = self.run_claimed(&tick, cancel).await;

        if let Err(e) = self.leases.release(&lease).await {
            warn!(tick_id = %tick.id, error = %e, "Failed to release sleep scheduler lease");
        }

        result
    }

    async fn run_claimed(
        &self,
        tick: &Tick,
        cancel: watch::Receiver<bool>,
    ) -> TickResult<Option<TickReport>> {
        let claimed = self
            .ledger
            .claim(&tick.id, tick.reference)
            .await
            .map_err(TickError::Coordination)?;
        if !claimed {
            debug!(tick_id = %tick.id, "Sleep schedule tick already processed");
            return Ok(None);
        }

        let result = match tokio::time::timeout(
            self.config.lease_duration,
            self.reconciler.run_tick(tick, cancel),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TickError::LeaseExpired(self.config.lease_duration)),
        };

        let (status, failure_count) = match &result {
            Ok(report) => (TickStatus::Completed, report.failures.len()),
            Err(TickError::Cancelled) => (TickStatus::Cancelled, 0),
            Err(_) => (TickStatus::Aborted, 0),
        };

        let finished_at = self.reconciler.context().clock.now();
        if let Err(e) = self
            .ledger
            .finish(&tick.id, status, failure_count, finished_at)
            .await
        {
            warn!(tick_id = %tick.id, error = %e, "Failed to record sleep schedule tick outcome");
        }

        result.map(Some)
    }
}
