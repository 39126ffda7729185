//! Typed ID definitions.

use crate::define_id;

define_id!(
    /// Identifier of a compute host subject to sleep scheduling.
    HostId,
    "host"
);

define_id!(
    /// Identity of a scheduler worker process, recorded as the lease holder.
    WorkerId,
    "wrk"
);
