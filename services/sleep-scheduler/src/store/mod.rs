//! Collaborator interfaces consumed by the orchestrator.
//!
//! The Postgres implementations live in [`crate::db`]; [`memory`] provides
//! an in-process implementation of every trait for tests and local runs.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostsleep_id::{HostId, WorkerId};
use hostsleep_reconcile::{Failure, FailureList};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::Host;
use crate::jobs::HostModifyJob;

/// Errors returned by collaborator stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] crate::db::DbError),

    /// An update addressed a host that does not exist.
    #[error("host not found: {0}")]
    HostNotFound(HostId),

    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(crate::db::DbError::Query(e))
    }
}

/// A host record matched by a query that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableHost {
    /// The stored id, verbatim.
    pub host_id: String,
    pub reason: String,
}

/// Hosts matched by a query.
///
/// Records that fail to decode are returned alongside the readable ones so
/// callers can report them per host and carry on with the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostBatch {
    pub hosts: Vec<Host>,
    pub unreadable: Vec<UnreadableHost>,
}

impl HostBatch {
    /// One failure per unreadable record.
    pub fn unreadable_failures(&self) -> FailureList {
        let mut failures = FailureList::new();
        for record in &self.unreadable {
            failures.push(Failure::for_resource(
                &record.host_id,
                "reading host record",
                &record.reason,
            ));
        }
        failures
    }
}

impl From<Vec<Host>> for HostBatch {
    fn from(hosts: Vec<Host>) -> Self {
        Self {
            hosts,
            unreadable: Vec::new(),
        }
    }
}

impl FromIterator<Result<Host, UnreadableHost>> for HostBatch {
    fn from_iter<I: IntoIterator<Item = Result<Host, UnreadableHost>>>(iter: I) -> Self {
        let mut batch = HostBatch::default();
        for record in iter {
            match record {
                Ok(host) => batch.hosts.push(host),
                Err(unreadable) => batch.unreadable.push(unreadable),
            }
        }
        batch
    }
}

/// Query and update primitives over host records.
#[async_trait]
pub trait HostStore: Send + Sync {
    /// Eligible hosts with at least one unset next time.
    async fn find_missing_next_time(
        &self,
        reference: DateTime<Utc>,
    ) -> Result<HostBatch, StoreError>;

    /// Eligible hosts whose pending start or stop is older than `timeout`.
    async fn find_exceeding_timeout(
        &self,
        reference: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<HostBatch, StoreError>;

    /// Eligible running hosts whose next stop has arrived.
    async fn find_due_to_stop(&self, reference: DateTime<Utc>) -> Result<HostBatch, StoreError>;

    /// Eligible stopped hosts whose next start has arrived.
    async fn find_due_to_start(&self, reference: DateTime<Utc>)
        -> Result<HostBatch, StoreError>;

    /// Hosts with a temporary exemption that ended at or before `reference`.
    async fn find_expired_temporary_exemptions(
        &self,
        reference: DateTime<Utc>,
    ) -> Result<HostBatch, StoreError>;

    async fn clear_temporary_exemption(&self, host_id: &HostId) -> Result<(), StoreError>;

    /// IDs of all hosts currently flagged permanently exempt.
    async fn find_permanently_exempt(&self) -> Result<Vec<HostId>, StoreError>;

    async fn set_permanently_exempt(&self, host_id: &HostId, exempt: bool)
        -> Result<(), StoreError>;

    async fn set_next_start_time(
        &self,
        host_id: &HostId,
        next_start: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_next_stop_time(
        &self,
        host_id: &HostId,
        next_stop: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_next_start_and_stop_times(
        &self,
        host_id: &HostId,
        next_start: DateTime<Utc>,
        next_stop: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Global service flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFlags {
    /// Suspends automatic stopping; automatic starting is unaffected.
    pub sleep_schedule_disabled: bool,
}

/// Admin-managed sleep schedule settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepScheduleSettings {
    pub permanently_exempt_hosts: Vec<HostId>,
}

/// Source of flags and admin settings.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn service_flags(&self) -> Result<ServiceFlags, StoreError>;

    async fn sleep_schedule_settings(&self) -> Result<SleepScheduleSettings, StoreError>;
}

/// Outcome of submitting a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Enqueued,
    /// A job with the same id was already submitted.
    Duplicate,
}

/// Job queue group accepting stop/start jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn submit(&self, group: &str, job: &HostModifyJob)
        -> Result<SubmitOutcome, StoreError>;
}

/// An exclusive, time-bounded lease on a named scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub scope: String,
    pub holder: WorkerId,
    pub expires_at: DateTime<Utc>,
}

/// Keyed mutex backing deployment-wide mutual exclusion.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take the lease if it is free, expired, or already ours.
    async fn try_acquire(
        &self,
        scope: &str,
        holder: &WorkerId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, StoreError>;

    /// Release a lease we hold.
    ///
    /// Releasing a lease taken over by someone else is a no-op.
    async fn release(&self, lease: &Lease) -> Result<(), StoreError>;
}

/// Terminal status of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickStatus {
    Completed,
    Cancelled,
    Aborted,
}

impl TickStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickStatus::Completed => "completed",
            TickStatus::Cancelled => "cancelled",
            TickStatus::Aborted => "aborted",
        }
    }
}

/// Records which tick ids have run, so a time window is processed once.
#[async_trait]
pub trait TickLedger: Send + Sync {
    /// Claim a tick id. Returns false if it was already claimed.
    async fn claim(&self, tick_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn finish(
        &self,
        tick_id: &str,
        status: TickStatus,
        failure_count: usize,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
