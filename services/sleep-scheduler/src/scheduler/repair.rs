//! Schedule repair engine.
//!
//! Heals two kinds of drift in host schedule state:
//! - next start/stop times that are unset
//! - next start/stop times whose action has been pending longer than the
//!   action timeout (a stop or start was scheduled but never completed)
//!
//! The two fields are repaired independently. When both need repair they are
//! recomputed and written together; otherwise only the drifted field changes,
//! so a still-valid pending action is kept.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hostsleep_id::HostId;
use hostsleep_reconcile::{Failure, FailureList};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::host::Host;
use crate::policy::ScheduleCalculator;
use crate::store::HostStore;

/// Which next-time field was repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleField {
    NextStart,
    NextStop,
}

/// Why a host was repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairReason {
    Missing,
    ExceededTimeout,
}

/// One rewritten field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: ScheduleField,
    pub old: Option<DateTime<Utc>>,
    pub new: DateTime<Utc>,
}

/// The rewrite applied to one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repair {
    pub host_id: HostId,
    pub started_by: String,
    pub reason: RepairReason,
    pub changes: Vec<FieldChange>,
}

impl Repair {
    pub fn change(&self, field: ScheduleField) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.field == field)
    }
}

/// Result of a repair pass.
#[derive(Debug, Default, Clone)]
pub struct RepairReport {
    pub repairs: Vec<Repair>,
    pub failures: FailureList,
}

impl RepairReport {
    #[must_use]
    pub fn merge(mut self, other: RepairReport) -> Self {
        self.repairs.extend(other.repairs);
        self.failures = self.failures.merge(other.failures);
        self
    }

    /// Number of distinct hosts touched.
    pub fn hosts_repaired(&self) -> usize {
        let mut ids: Vec<_> = self.repairs.iter().map(|r| r.host_id).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }
}

pub struct ScheduleRepairer {
    hosts: Arc<dyn HostStore>,
    calculator: Arc<dyn ScheduleCalculator>,
    action_timeout: Duration,
    job_id: String,
}

impl ScheduleRepairer {
    pub fn new(
        hosts: Arc<dyn HostStore>,
        calculator: Arc<dyn ScheduleCalculator>,
        action_timeout: Duration,
        job_id: impl Into<String>,
    ) -> Self {
        Self {
            hosts,
            calculator,
            action_timeout,
            job_id: job_id.into(),
        }
    }

    /// Fill in unset next start/stop times.
    #[instrument(skip(self), fields(job = %self.job_id))]
    pub async fn fix_missing_next_times(&self, reference: DateTime<Utc>) -> RepairReport {
        let mut report = RepairReport::default();

        let batch = match self.hosts.find_missing_next_time(reference).await {
            Ok(batch) => batch,
            Err(e) => {
                report.failures.push(Failure::general(
                    "finding hosts with missing next stop/start times",
                    e,
                ));
                return report;
            }
        };

        report.failures = batch.unreadable_failures();
        for host in batch.hosts {
            let start = host.sleep_schedule.next_start_time.is_none();
            let stop = host.sleep_schedule.next_stop_time.is_none();
            self.reschedule(&host, reference, start, stop, RepairReason::Missing, &mut report)
                .await;
        }

        report
    }

    /// Reschedule actions that have been pending longer than the action timeout.
    #[instrument(skip(self), fields(job = %self.job_id))]
    pub async fn fix_exceeding_timeout(&self, reference: DateTime<Utc>) -> RepairReport {
        let mut report = RepairReport::default();

        let batch = match self
            .hosts
            .find_exceeding_timeout(reference, self.action_timeout)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                report.failures.push(Failure::general(
                    "finding hosts exceeding sleep schedule timeout",
                    e,
                ));
                return report;
            }
        };

        report.failures = batch.unreadable_failures();
        for host in batch.hosts {
            let start = host.start_exceeds_timeout(reference, self.action_timeout);
            let stop = host.stop_exceeds_timeout(reference, self.action_timeout);
            self.reschedule(
                &host,
                reference,
                start,
                stop,
                RepairReason::ExceededTimeout,
                &mut report,
            )
            .await;
        }

        report
    }

    async fn reschedule(
        &self,
        host: &Host,
        reference: DateTime<Utc>,
        start: bool,
        stop: bool,
        reason: RepairReason,
        report: &mut RepairReport,
    ) {
        let schedule = &host.sleep_schedule;
        let result = match (start, stop) {
            (true, true) => self
                .reschedule_both(host, reference)
                .await
                .map(|(next_start, next_stop)| {
                    vec![
                        FieldChange {
                            field: ScheduleField::NextStart,
                            old: schedule.next_start_time,
                            new: next_start,
                        },
                        FieldChange {
                            field: ScheduleField::NextStop,
                            old: schedule.next_stop_time,
                            new: next_stop,
                        },
                    ]
                }),
            (true, false) => self.reschedule_start(host, reference).await.map(|next| {
                vec![FieldChange {
                    field: ScheduleField::NextStart,
                    old: schedule.next_start_time,
                    new: next,
                }]
            }),
            (false, true) => self.reschedule_stop(host, reference).await.map(|next| {
                vec![FieldChange {
                    field: ScheduleField::NextStop,
                    old: schedule.next_stop_time,
                    new: next,
                }]
            }),
            (false, false) => return,
        };

        match result {
            Ok(changes) => {
                let repair = Repair {
                    host_id: host.id,
                    started_by: host.started_by.clone(),
                    reason,
                    changes,
                };
                self.log_repair(&repair);
                report.repairs.push(repair);
            }
            Err(failure) => report.failures.push(failure),
        }
    }

    async fn reschedule_both(
        &self,
        host: &Host,
        reference: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), Failure> {
        let (next_start, next_stop) = self
            .calculator
            .next_start_and_stop(host, reference)
            .map_err(|e| Failure::for_resource(host.id, "getting next start and stop times", e))?;
        self.hosts
            .set_next_start_and_stop_times(&host.id, next_start, next_stop)
            .await
            .map_err(|e| Failure::for_resource(host.id, "setting next start and stop times", e))?;
        Ok((next_start, next_stop))
    }

    async fn reschedule_start(
        &self,
        host: &Host,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, Failure> {
        let next_start = self
            .calculator
            .next_start(host, reference)
            .map_err(|e| Failure::for_resource(host.id, "getting next start time", e))?;
        self.hosts
            .set_next_start_time(&host.id, next_start)
            .await
            .map_err(|e| Failure::for_resource(host.id, "setting next start time", e))?;
        Ok(next_start)
    }

    async fn reschedule_stop(
        &self,
        host: &Host,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, Failure> {
        let next_stop = self
            .calculator
            .next_stop(host, reference)
            .map_err(|e| Failure::for_resource(host.id, "getting next stop time", e))?;
        self.hosts
            .set_next_stop_time(&host.id, next_stop)
            .await
            .map_err(|e| Failure::for_resource(host.id, "setting next stop time", e))?;
        Ok(next_stop)
    }

    /// One log entry per host, carrying every field that changed.
    fn log_repair(&self, repair: &Repair) {
        let start = repair.change(ScheduleField::NextStart);
        let stop = repair.change(ScheduleField::NextStop);
        let old_next_start = start.and_then(|c| c.old);
        let new_next_start = start.map(|c| c.new);
        let old_next_stop = stop.and_then(|c| c.old);
        let new_next_stop = stop.map(|c| c.new);

        match repair.reason {
            RepairReason::Missing => info!(
                host_id = %repair.host_id,
                started_by = %repair.started_by,
                ?old_next_start,
                ?new_next_start,
                ?old_next_stop,
                ?new_next_stop,
                job = %self.job_id,
                "Host is missing next scheduled time, re-scheduled to next available time"
            ),
            RepairReason::ExceededTimeout => warn!(
                host_id = %repair.host_id,
                started_by = %repair.started_by,
                ?old_next_start,
                ?new_next_start,
                ?old_next_stop,
                ?new_next_stop,
                job = %self.job_id,
                "Host exceeded scheduled action timeout, re-scheduled to next available time"
            ),
        }
    }
}
