//! Host sleep-schedule orchestrator.
//!
//! Keeps per-host next start/stop times healthy and turns hosts that are due
//! into staggered stop/start jobs, once per tick and under an exclusive lease.

pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod host;
pub mod jobs;
pub mod policy;
pub mod scheduler;
pub mod store;
