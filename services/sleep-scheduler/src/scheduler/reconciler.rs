//! Sleep-schedule reconciler: runs one tick.
//!
//! A tick resolves configuration, then runs exemption sync, schedule repair
//! and dispatch strictly in that order, so dispatch sees healed state.
//! Per-host failures are merged into the tick report and never stop the
//! remaining hosts. Only a configuration failure aborts the tick.

use chrono::{DateTime, Utc};
use hostsleep_reconcile::{timestamp_token, AggregateError, Failure, FailureList};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::dispatch::Dispatcher;
use super::exemptions::{ExemptionReport, ExemptionSynchronizer};
use super::repair::{RepairReport, ScheduleRepairer};
use crate::context::TickContext;
use crate::jobs::SPAWN_HOST_MODIFICATION_QUEUE_GROUP;
use crate::store::{ServiceFlags, SleepScheduleSettings, StoreError, SubmitOutcome};

/// Name of the scheduler job; also the lease scope.
pub const SLEEP_SCHEDULER_JOB_NAME: &str = "sleep-scheduler";

/// Result type for tick operations.
pub type TickResult<T> = Result<T, TickError>;

/// Errors that end a tick early.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// Flags or admin settings could not be read; no phase ran.
    #[error("resolving configuration: {0}")]
    Config(#[source] StoreError),

    /// The cancel signal fired before the tick finished.
    #[error("tick cancelled")]
    Cancelled,

    /// Lease or tick-ledger bookkeeping failed.
    #[error("coordinating tick: {0}")]
    Coordination(#[source] StoreError),

    /// The tick ran past the lease it was started under.
    #[error("tick exceeded its lease of {0:?}")]
    LeaseExpired(std::time::Duration),
}

/// One logical unit of work, identified by the minute it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub id: String,
    /// Reference time every phase reasons about.
    pub reference: DateTime<Utc>,
    /// Minute-truncated token stamped on jobs.
    pub timestamp: String,
}

impl Tick {
    /// Build the tick covering `reference`.
    pub fn at(reference: DateTime<Utc>) -> Self {
        let timestamp = timestamp_token(reference);
        Self {
            id: format!("{SLEEP_SCHEDULER_JOB_NAME}.{timestamp}"),
            reference,
            timestamp,
        }
    }
}

/// Outcome of a tick that ran to completion.
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    pub tick_id: String,
    pub exemptions: ExemptionReport,
    pub repairs: RepairReport,
    pub stop_jobs: usize,
    pub start_jobs: usize,
    pub jobs_enqueued: usize,
    pub jobs_duplicate: usize,
    /// Every failure from every phase.
    pub failures: FailureList,
}

impl TickReport {
    /// The aggregate error of the tick, if anything failed.
    pub fn outcome(&self) -> Result<(), AggregateError> {
        self.failures.clone().into_result()
    }
}

/// Resolved configuration for one tick.
#[derive(Debug, Clone)]
struct TickConfig {
    flags: ServiceFlags,
    settings: SleepScheduleSettings,
}

/// Runs reconciliation ticks against a [`TickContext`].
pub struct SleepScheduleReconciler {
    ctx: TickContext,
}

impl SleepScheduleReconciler {
    pub fn new(ctx: TickContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &TickContext {
        &self.ctx
    }

    /// Run one tick, aborting if `cancel` turns true.
    ///
    /// Dropping the in-flight phases on cancellation aborts their pending
    /// persistence calls.
    pub async fn run_tick(
        &self,
        tick: &Tick,
        cancel: watch::Receiver<bool>,
    ) -> TickResult<TickReport> {
        tokio::select! {
            biased;
            _ = cancelled(cancel) => {
                warn!(tick_id = %tick.id, "Sleep schedule tick cancelled");
                Err(TickError::Cancelled)
            }
            result = self.run_phases(tick) => result,
        }
    }

    #[instrument(skip(self, tick), fields(tick_id = %tick.id, reference = %tick.reference))]
    async fn run_phases(&self, tick: &Tick) -> TickResult<TickReport> {
        let config = self.resolve_config().await?;
        let reference = tick.reference;

        let exemptions = ExemptionSynchronizer::new(self.ctx.hosts.clone());
        let exemption_report = exemptions
            .clear_expired_temporary_exemptions(reference)
            .await
            .merge(
                exemptions
                    .sync_permanent_exemptions(&config.settings.permanently_exempt_hosts)
                    .await,
            );

        let repairer = ScheduleRepairer::new(
            self.ctx.hosts.clone(),
            self.ctx.calculator.clone(),
            self.ctx.action_timeout,
            tick.id.clone(),
        );
        let repair_report = repairer
            .fix_missing_next_times(reference)
            .await
            .merge(repairer.fix_exceeding_timeout(reference).await);

        let dispatcher =
            Dispatcher::new(self.ctx.hosts.clone(), self.ctx.stagger, tick.id.clone());
        let plan = dispatcher
            .make_stop_and_start_jobs(reference, &config.flags, &tick.timestamp)
            .await;
        let stop_jobs = plan.stop_jobs.len();
        let start_jobs = plan.start_jobs.len();
        let (jobs, dispatch_failures) = plan.into_jobs();

        let mut submit_failures = FailureList::new();
        let mut jobs_enqueued = 0;
        let mut jobs_duplicate = 0;
        for job in &jobs {
            match self
                .ctx
                .queue
                .submit(SPAWN_HOST_MODIFICATION_QUEUE_GROUP, job)
                .await
            {
                Ok(SubmitOutcome::Enqueued) => jobs_enqueued += 1,
                Ok(SubmitOutcome::Duplicate) => {
                    debug!(job_id = %job.job_id, "Job already enqueued");
                    jobs_duplicate += 1;
                }
                Err(e) => {
                    submit_failures.push(Failure::for_resource(&job.job_id, "enqueueing job", e));
                }
            }
        }

        let failures = exemption_report
            .failures
            .clone()
            .merge(repair_report.failures.clone())
            .merge(dispatch_failures)
            .merge(submit_failures);

        let report = TickReport {
            tick_id: tick.id.clone(),
            exemptions: exemption_report,
            repairs: repair_report,
            stop_jobs,
            start_jobs,
            jobs_enqueued,
            jobs_duplicate,
            failures,
        };

        for failure in report.failures.iter() {
            warn!(
                tick_id = %report.tick_id,
                resource = failure.resource.as_deref().unwrap_or("-"),
                error = %failure,
                "Sleep schedule tick failure"
            );
        }
        info!(
            tick_id = %report.tick_id,
            temporary_exemptions_cleared = report.exemptions.temporary_cleared,
            hosts_repaired = report.repairs.hosts_repaired(),
            stop_jobs = report.stop_jobs,
            start_jobs = report.start_jobs,
            jobs_enqueued = report.jobs_enqueued,
            failures = report.failures.len(),
            "Sleep schedule tick complete"
        );

        Ok(report)
    }

    async fn resolve_config(&self) -> TickResult<TickConfig> {
        let flags = self
            .ctx
            .settings
            .service_flags()
            .await
            .map_err(TickError::Config)?;
        let settings = self
            .ctx
            .settings
            .sleep_schedule_settings()
            .await
            .map_err(TickError::Config)?;
        Ok(TickConfig { flags, settings })
    }
}

/// Resolves once `cancel` is true; never resolves if the sender is gone.
async fn cancelled(mut cancel: watch::Receiver<bool>) {
    let sender_dropped = cancel.wait_for(|c| *c).await.is_err();
    if sender_dropped {
        std::future::pending::<()>().await;
    }
}
