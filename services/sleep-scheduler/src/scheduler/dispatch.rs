//! Dispatcher: turns due hosts into staggered stop/start jobs.
//!
//! Building jobs is the whole contract here. Submission happens in the
//! reconciler, and advancing a host's next times after the action runs is
//! left to the job executor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hostsleep_id::HostId;
use hostsleep_reconcile::{Failure, FailureList, Stagger};
use tracing::{info, instrument};

use crate::host::{Host, SLEEP_SCHEDULE_USER};
use crate::jobs::{HostAction, HostModifyJob, ModifySource};
use crate::store::{HostStore, ServiceFlags};

/// Jobs produced by one dispatch pass.
#[derive(Debug, Default, Clone)]
pub struct DispatchPlan {
    pub stop_jobs: Vec<HostModifyJob>,
    pub start_jobs: Vec<HostModifyJob>,
    pub failures: FailureList,
}

impl DispatchPlan {
    /// Stop jobs followed by start jobs.
    pub fn into_jobs(self) -> (Vec<HostModifyJob>, FailureList) {
        let mut jobs = self.stop_jobs;
        jobs.extend(self.start_jobs);
        (jobs, self.failures)
    }
}

pub struct Dispatcher {
    hosts: Arc<dyn HostStore>,
    stagger: Stagger,
    job_id: String,
}

impl Dispatcher {
    pub fn new(hosts: Arc<dyn HostStore>, stagger: Stagger, job_id: impl Into<String>) -> Self {
        Self {
            hosts,
            stagger,
            job_id: job_id.into(),
        }
    }

    /// Build stop and start jobs for hosts due at `reference`.
    ///
    /// When the sleep schedule is disabled only stopping is suspended;
    /// hosts that are due to start are still started.
    #[instrument(
        skip(self, flags),
        fields(job = %self.job_id, sleep_schedule_disabled = flags.sleep_schedule_disabled)
    )]
    pub async fn make_stop_and_start_jobs(
        &self,
        reference: DateTime<Utc>,
        flags: &ServiceFlags,
        timestamp: &str,
    ) -> DispatchPlan {
        let mut plan = DispatchPlan::default();

        if !flags.sleep_schedule_disabled {
            match self.hosts.find_due_to_stop(reference).await {
                Ok(batch) => {
                    plan.failures = plan.failures.merge(batch.unreadable_failures());
                    plan.stop_jobs =
                        self.build_jobs(HostAction::Stop, &batch.hosts, reference, timestamp);
                }
                Err(e) => plan.failures.push(Failure::general("finding hosts to stop", e)),
            }
        }

        match self.hosts.find_due_to_start(reference).await {
            Ok(batch) => {
                plan.failures = plan.failures.merge(batch.unreadable_failures());
                plan.start_jobs =
                    self.build_jobs(HostAction::Start, &batch.hosts, reference, timestamp);
            }
            Err(e) => plan.failures.push(Failure::general("finding hosts to start", e)),
        }

        if !plan.stop_jobs.is_empty() {
            let host_ids: Vec<HostId> = plan.stop_jobs.iter().map(|j| j.host_id).collect();
            info!(
                num_jobs = host_ids.len(),
                host_ids = ?host_ids,
                job = %self.job_id,
                "Enqueueing jobs to stop hosts for sleep schedule"
            );
        }
        if !plan.start_jobs.is_empty() {
            let host_ids: Vec<HostId> = plan.start_jobs.iter().map(|j| j.host_id).collect();
            info!(
                num_jobs = host_ids.len(),
                host_ids = ?host_ids,
                job = %self.job_id,
                "Enqueueing jobs to start hosts for sleep schedule"
            );
        }

        plan
    }

    fn build_jobs(
        &self,
        action: HostAction,
        hosts: &[Host],
        reference: DateTime<Utc>,
        timestamp: &str,
    ) -> Vec<HostModifyJob> {
        hosts
            .iter()
            .enumerate()
            .map(|(i, host)| HostModifyJob {
                job_id: HostModifyJob::make_id(action, &host.id, timestamp),
                action,
                host_id: host.id,
                started_by: host.started_by.clone(),
                // Staggered by position, capped by the stagger ceiling.
                wait_until: self.stagger.wait_until(reference, i),
                source: ModifySource::SleepSchedule,
                user: SLEEP_SCHEDULE_USER.to_string(),
                timestamp: timestamp.to_string(),
            })
            .collect()
    }
}
