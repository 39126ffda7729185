//! Sleep-schedule orchestration.
//!
//! The orchestrator is responsible for:
//! - Expiring temporary exemptions and syncing permanent ones from settings
//! - Repairing missing or stuck next start/stop times
//! - Building staggered stop/start jobs for hosts that are due
//! - Running the above once per tick under an exclusive lease

pub mod dispatch;
pub mod exemptions;
pub mod reconciler;
pub mod repair;
mod worker;

pub use dispatch::{DispatchPlan, Dispatcher};
pub use exemptions::{ExemptionReport, ExemptionSynchronizer};
pub use reconciler::{
    SleepScheduleReconciler, Tick, TickError, TickReport, TickResult, SLEEP_SCHEDULER_JOB_NAME,
};
pub use repair::{Repair, RepairReason, RepairReport, ScheduleField, ScheduleRepairer};
pub use worker::{SleepSchedulerWorker, WorkerConfig};
