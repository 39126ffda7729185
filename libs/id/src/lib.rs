//! # hostsleep-id
//!
//! Typed identifiers for the host sleep-schedule orchestrator.
//!
//! Every identifier has the canonical form `{prefix}_{ulid}`:
//!
//! - `host_01HV4Z2WQXKJNM8GPQY6VBKC3D` for a compute host
//! - `wrk_01HV4Z3MXNKPQR9HSTZ7WCLD4E` for a scheduler worker process
//!
//! The prefix keeps a host id from being passed where a worker id is
//! expected, and the ULID keeps ids sortable by creation time.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::{HostId, WorkerId};

pub use ulid::Ulid;
