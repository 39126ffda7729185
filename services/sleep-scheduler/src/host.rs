//! Host records and their sleep-schedule state.
//!
//! The query predicates used by the orchestrator live here as pure functions
//! so the in-memory store and the Postgres queries share one definition.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hostsleep_id::HostId;
use serde::{Deserialize, Serialize};

use crate::policy::StoredPolicy;

/// Owner value for pooled hosts started by the system itself.
pub const SYSTEM_ACTOR: &str = "system";

/// Actor recorded on stop/start jobs created by the sleep scheduler.
pub const SLEEP_SCHEDULE_USER: &str = "sleep_schedule";

/// How a host was provisioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    /// Spawned on demand from a cloud provider.
    Spawn,
    /// Statically provisioned; never follows a sleep schedule.
    Static,
}

/// Lifecycle status of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Provisioning,
    Running,
    Stopping,
    Stopped,
    Starting,
    Terminated,
}

impl HostStatus {
    /// Database/string form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Provisioning => "provisioning",
            HostStatus::Running => "running",
            HostStatus::Stopping => "stopping",
            HostStatus::Stopped => "stopped",
            HostStatus::Starting => "starting",
            HostStatus::Terminated => "terminated",
        }
    }

    /// Statuses in which a host follows its sleep schedule.
    pub fn is_schedulable(&self) -> bool {
        matches!(
            self,
            HostStatus::Running | HostStatus::Stopping | HostStatus::Stopped | HostStatus::Starting
        )
    }
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(HostStatus::Provisioning),
            "running" => Ok(HostStatus::Running),
            "stopping" => Ok(HostStatus::Stopping),
            "stopped" => Ok(HostStatus::Stopped),
            "starting" => Ok(HostStatus::Starting),
            "terminated" => Ok(HostStatus::Terminated),
            other => Err(format!("unknown host status: {other}")),
        }
    }
}

/// Per-host sleep-schedule bookkeeping.
///
/// `None` for a next time means the time is unset and must be repaired.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScheduleState {
    pub next_start_time: Option<DateTime<Utc>>,
    pub next_stop_time: Option<DateTime<Utc>>,
    pub temporarily_exempt_until: Option<DateTime<Utc>>,
    /// Owned by the exemption synchronizer.
    pub permanently_exempt: bool,
    /// Set when the owner asked for the host to stay off until started manually.
    pub should_keep_off: bool,
    pub policy: StoredPolicy,
}

impl ScheduleState {
    /// True while a temporary exemption is still in effect.
    pub fn is_temporarily_exempt(&self, reference: DateTime<Utc>) -> bool {
        self.temporarily_exempt_until
            .is_some_and(|until| until > reference)
    }
}

/// A compute host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub started_by: String,
    pub kind: HostKind,
    pub status: HostStatus,
    /// Only unexpirable hosts follow a sleep schedule.
    pub no_expiration: bool,
    pub sleep_schedule: ScheduleState,
}

impl Host {
    /// Whether the host is owned by the system rather than a user.
    pub fn is_system_owned(&self) -> bool {
        self.started_by == SYSTEM_ACTOR
    }

    /// Common filter shared by every sleep-schedule query.
    pub fn is_schedule_eligible(&self, reference: DateTime<Utc>) -> bool {
        let schedule = &self.sleep_schedule;
        self.kind == HostKind::Spawn
            && !self.is_system_owned()
            && self.no_expiration
            && self.status.is_schedulable()
            && !schedule.permanently_exempt
            && !schedule.is_temporarily_exempt(reference)
            && !schedule.should_keep_off
    }

    /// Eligible and missing at least one next time.
    pub fn is_missing_next_time(&self, reference: DateTime<Utc>) -> bool {
        self.is_schedule_eligible(reference)
            && (self.sleep_schedule.next_start_time.is_none()
                || self.sleep_schedule.next_stop_time.is_none())
    }

    /// Whether the pending start has been outstanding longer than `timeout`.
    pub fn start_exceeds_timeout(&self, reference: DateTime<Utc>, timeout: Duration) -> bool {
        self.sleep_schedule
            .next_start_time
            .is_some_and(|t| hostsleep_reconcile::exceeds_timeout(reference, t, timeout))
    }

    /// Whether the pending stop has been outstanding longer than `timeout`.
    pub fn stop_exceeds_timeout(&self, reference: DateTime<Utc>, timeout: Duration) -> bool {
        self.sleep_schedule
            .next_stop_time
            .is_some_and(|t| hostsleep_reconcile::exceeds_timeout(reference, t, timeout))
    }

    /// Eligible and at least one scheduled action is stuck.
    pub fn exceeds_timeout(&self, reference: DateTime<Utc>, timeout: Duration) -> bool {
        self.is_schedule_eligible(reference)
            && (self.start_exceeds_timeout(reference, timeout)
                || self.stop_exceeds_timeout(reference, timeout))
    }

    /// Eligible, running, and its next stop has arrived.
    pub fn is_due_to_stop(&self, reference: DateTime<Utc>) -> bool {
        self.is_schedule_eligible(reference)
            && self.status == HostStatus::Running
            && self
                .sleep_schedule
                .next_stop_time
                .is_some_and(|t| t <= reference)
    }

    /// Eligible, stopped, and its next start has arrived.
    pub fn is_due_to_start(&self, reference: DateTime<Utc>) -> bool {
        self.is_schedule_eligible(reference)
            && self.status == HostStatus::Stopped
            && self
                .sleep_schedule
                .next_start_time
                .is_some_and(|t| t <= reference)
    }
}
