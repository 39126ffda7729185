//! Exemption synchronizer.
//!
//! Expires temporary exemptions and keeps the permanent-exemption flag in
//! line with the admin-configured list. Writes host records only.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hostsleep_id::HostId;
use hostsleep_reconcile::{Failure, FailureList};
use tracing::{debug, info, instrument};

use crate::store::{HostStore, StoreError};

/// Result of an exemption pass.
#[derive(Debug, Default, Clone)]
pub struct ExemptionReport {
    pub temporary_cleared: usize,
    pub permanent_added: usize,
    pub permanent_removed: usize,
    pub failures: FailureList,
}

impl ExemptionReport {
    /// Combine two reports.
    #[must_use]
    pub fn merge(self, other: ExemptionReport) -> Self {
        Self {
            temporary_cleared: self.temporary_cleared + other.temporary_cleared,
            permanent_added: self.permanent_added + other.permanent_added,
            permanent_removed: self.permanent_removed + other.permanent_removed,
            failures: self.failures.merge(other.failures),
        }
    }
}

pub struct ExemptionSynchronizer {
    hosts: Arc<dyn HostStore>,
}

impl ExemptionSynchronizer {
    pub fn new(hosts: Arc<dyn HostStore>) -> Self {
        Self { hosts }
    }

    /// Clear temporary exemptions that ended at or before `reference`.
    #[instrument(skip(self))]
    pub async fn clear_expired_temporary_exemptions(
        &self,
        reference: DateTime<Utc>,
    ) -> ExemptionReport {
        let mut report = ExemptionReport::default();

        let expired = match self.hosts.find_expired_temporary_exemptions(reference).await {
            Ok(batch) => batch,
            Err(e) => {
                report.failures.push(Failure::general(
                    "finding hosts with expired temporary exemptions",
                    e,
                ));
                return report;
            }
        };

        report.failures = expired.unreadable_failures();
        for host in expired.hosts {
            match self.hosts.clear_temporary_exemption(&host.id).await {
                Ok(()) => {
                    info!(
                        host_id = %host.id,
                        started_by = %host.started_by,
                        exempt_until = ?host.sleep_schedule.temporarily_exempt_until,
                        "Cleared expired temporary sleep schedule exemption"
                    );
                    report.temporary_cleared += 1;
                }
                Err(e) => report.failures.push(Failure::for_resource(
                    host.id,
                    "clearing expired temporary exemption",
                    e,
                )),
            }
        }

        report
    }

    /// Make the permanently exempt set equal to `exempt_host_ids`.
    #[instrument(skip(self, exempt_host_ids), fields(configured = exempt_host_ids.len()))]
    pub async fn sync_permanent_exemptions(&self, exempt_host_ids: &[HostId]) -> ExemptionReport {
        let mut report = ExemptionReport::default();

        let current: BTreeSet<HostId> = match self.hosts.find_permanently_exempt().await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                report
                    .failures
                    .push(Failure::general("finding permanently exempt hosts", e));
                return report;
            }
        };
        let desired: BTreeSet<HostId> = exempt_host_ids.iter().copied().collect();

        for id in desired.difference(&current) {
            match self.hosts.set_permanently_exempt(id, true).await {
                Ok(()) => report.permanent_added += 1,
                // Configured hosts may already be gone.
                Err(StoreError::HostNotFound(_)) => {
                    debug!(host_id = %id, "Permanently exempt host does not exist");
                }
                Err(e) => report.failures.push(Failure::for_resource(
                    id,
                    "marking host permanently exempt",
                    e,
                )),
            }
        }

        for id in current.difference(&desired) {
            match self.hosts.set_permanently_exempt(id, false).await {
                Ok(()) => report.permanent_removed += 1,
                Err(e) => report.failures.push(Failure::for_resource(
                    id,
                    "clearing permanent exemption",
                    e,
                )),
            }
        }

        if report.permanent_added > 0 || report.permanent_removed > 0 {
            info!(
                added = report.permanent_added,
                removed = report.permanent_removed,
                "Synced permanently exempt hosts"
            );
        }

        report
    }
}
