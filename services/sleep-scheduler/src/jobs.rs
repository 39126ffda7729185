//! Stop/start job descriptors handed to the downstream job executor.

use chrono::{DateTime, Utc};
use hostsleep_id::HostId;
use serde::{Deserialize, Serialize};

/// Queue group that receives host stop/start jobs.
pub const SPAWN_HOST_MODIFICATION_QUEUE_GROUP: &str = "spawnhost-modification";

/// Action a job performs on its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostAction {
    Stop,
    Start,
}

impl HostAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostAction::Stop => "stop",
            HostAction::Start => "start",
        }
    }
}

/// Why a host modification was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifySource {
    SleepSchedule,
}

/// A stop or start request for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostModifyJob {
    /// Unique per host, action, and tick; resubmission is a no-op.
    pub job_id: String,
    pub action: HostAction,
    pub host_id: HostId,
    pub started_by: String,
    /// The executor must not run the job before this instant.
    pub wait_until: DateTime<Utc>,
    pub source: ModifySource,
    pub user: String,
    /// Timestamp token of the tick that created the job.
    pub timestamp: String,
}

impl HostModifyJob {
    /// Build the deterministic job id for a host action in a tick.
    pub fn make_id(action: HostAction, host_id: &HostId, timestamp: &str) -> String {
        format!("spawnhost-{}.{}.{}", action.as_str(), host_id, timestamp)
    }
}
