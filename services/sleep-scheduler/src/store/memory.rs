//! In-memory implementation of every collaborator store.
//!
//! Used by the test suite and for local runs without Postgres. Supports
//! failure injection and exposes counters for asserting on writes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use hostsleep_id::{HostId, WorkerId};
use tokio::sync::Mutex;

use super::{
    HostBatch, HostStore, JobQueue, Lease, LeaseStore, ServiceFlags, SettingsSource,
    SleepScheduleSettings, StoreError, SubmitOutcome, TickLedger, TickStatus, UnreadableHost,
};
use crate::host::Host;
use crate::jobs::HostModifyJob;

#[derive(Default)]
struct State {
    hosts: BTreeMap<HostId, Host>,
    flags: ServiceFlags,
    settings: SleepScheduleSettings,
    settings_unavailable: bool,
    failing_writes: HashSet<HostId>,
    failing_submissions: HashSet<HostId>,
    unreadable: HashMap<HostId, String>,
    query_delay: Option<Duration>,
    host_writes: usize,
    submitted: Vec<(String, HostModifyJob)>,
    submitted_ids: HashSet<String>,
    leases: HashMap<String, Lease>,
    ticks: HashMap<String, Option<TickStatus>>,
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with hosts.
    pub fn with_hosts(hosts: impl IntoIterator<Item = Host>) -> Self {
        let state = State {
            hosts: hosts.into_iter().map(|h| (h.id, h)).collect(),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    pub async fn host(&self, id: &HostId) -> Option<Host> {
        self.state.lock().await.hosts.get(id).cloned()
    }

    pub async fn set_flags(&self, flags: ServiceFlags) {
        self.state.lock().await.flags = flags;
    }

    pub async fn set_settings(&self, settings: SleepScheduleSettings) {
        self.state.lock().await.settings = settings;
    }

    /// Make flag and settings reads fail.
    pub async fn set_settings_unavailable(&self, unavailable: bool) {
        self.state.lock().await.settings_unavailable = unavailable;
    }

    /// Make every write to this host fail.
    pub async fn fail_writes_for(&self, id: HostId) {
        self.state.lock().await.failing_writes.insert(id);
    }

    /// Make job submissions for this host fail.
    pub async fn fail_submissions_for(&self, id: HostId) {
        self.state.lock().await.failing_submissions.insert(id);
    }

    /// Report this host's record as undecodable whenever a query matches it.
    pub async fn mark_unreadable(&self, id: HostId, reason: impl Into<String>) {
        self.state.lock().await.unreadable.insert(id, reason.into());
    }

    /// Delay every host query, simulating a slow database.
    pub async fn set_query_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.query_delay = delay;
    }

    /// Number of successful host writes so far.
    pub async fn host_writes(&self) -> usize {
        self.state.lock().await.host_writes
    }

    /// Jobs accepted by the queue, with their group.
    pub async fn submitted_jobs(&self) -> Vec<(String, HostModifyJob)> {
        self.state.lock().await.submitted.clone()
    }

    /// Final status of a tick; `Some(None)` if claimed but not finished.
    pub async fn tick_status(&self, tick_id: &str) -> Option<Option<TickStatus>> {
        self.state.lock().await.ticks.get(tick_id).copied()
    }

    async fn select(&self, predicate: impl Fn(&Host) -> bool) -> HostBatch {
        let delay = self.state.lock().await.query_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().await;
        state
            .hosts
            .values()
            .filter(|&h| predicate(h))
            .map(|h| match state.unreadable.get(&h.id) {
                Some(reason) => Err(UnreadableHost {
                    host_id: h.id.to_string(),
                    reason: reason.clone(),
                }),
                None => Ok(h.clone()),
            })
            .collect()
    }

    async fn update(&self, id: &HostId, apply: impl FnOnce(&mut Host)) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.failing_writes.contains(id) {
            return Err(StoreError::Unavailable(format!("injected write failure for {id}")));
        }
        let host = state.hosts.get_mut(id).ok_or(StoreError::HostNotFound(*id))?;
        apply(host);
        state.host_writes += 1;
        Ok(())
    }
}

#[async_trait]
impl HostStore for InMemoryStore {
    async fn find_missing_next_time(
        &self,
        reference: DateTime<Utc>,
    ) -> Result<HostBatch, StoreError> {
        Ok(self.select(|h| h.is_missing_next_time(reference)).await)
    }

    async fn find_exceeding_timeout(
        &self,
        reference: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<HostBatch, StoreError> {
        Ok(self.select(|h| h.exceeds_timeout(reference, timeout)).await)
    }

    async fn find_due_to_stop(&self, reference: DateTime<Utc>) -> Result<HostBatch, StoreError> {
        Ok(self.select(|h| h.is_due_to_stop(reference)).await)
    }

    async fn find_due_to_start(
        &self,
        reference: DateTime<Utc>,
    ) -> Result<HostBatch, StoreError> {
        Ok(self.select(|h| h.is_due_to_start(reference)).await)
    }

    async fn find_expired_temporary_exemptions(
        &self,
        reference: DateTime<Utc>,
    ) -> Result<HostBatch, StoreError> {
        Ok(self
            .select(|h| {
                h.sleep_schedule
                    .temporarily_exempt_until
                    .is_some_and(|until| until <= reference)
            })
            .await)
    }

    async fn clear_temporary_exemption(&self, host_id: &HostId) -> Result<(), StoreError> {
        self.update(host_id, |h| h.sleep_schedule.temporarily_exempt_until = None)
            .await
    }

    async fn find_permanently_exempt(&self) -> Result<Vec<HostId>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .hosts
            .values()
            .filter(|h| h.sleep_schedule.permanently_exempt)
            .map(|h| h.id)
            .collect())
    }

    async fn set_permanently_exempt(
        &self,
        host_id: &HostId,
        exempt: bool,
    ) -> Result<(), StoreError> {
        self.update(host_id, |h| h.sleep_schedule.permanently_exempt = exempt)
            .await
    }

    async fn set_next_start_time(
        &self,
        host_id: &HostId,
        next_start: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update(host_id, |h| h.sleep_schedule.next_start_time = Some(next_start))
            .await
    }

    async fn set_next_stop_time(
        &self,
        host_id: &HostId,
        next_stop: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update(host_id, |h| h.sleep_schedule.next_stop_time = Some(next_stop))
            .await
    }

    async fn set_next_start_and_stop_times(
        &self,
        host_id: &HostId,
        next_start: DateTime<Utc>,
        next_stop: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update(host_id, |h| {
            h.sleep_schedule.next_start_time = Some(next_start);
            h.sleep_schedule.next_stop_time = Some(next_stop);
        })
        .await
    }
}

#[async_trait]
impl SettingsSource for InMemoryStore {
    async fn service_flags(&self) -> Result<ServiceFlags, StoreError> {
        let state = self.state.lock().await;
        if state.settings_unavailable {
            return Err(StoreError::Unavailable("service flags".to_string()));
        }
        Ok(state.flags)
    }

    async fn sleep_schedule_settings(&self) -> Result<SleepScheduleSettings, StoreError> {
        let state = self.state.lock().await;
        if state.settings_unavailable {
            return Err(StoreError::Unavailable("admin settings".to_string()));
        }
        Ok(state.settings.clone())
    }
}

#[async_trait]
impl JobQueue for InMemoryStore {
    async fn submit(
        &self,
        group: &str,
        job: &HostModifyJob,
    ) -> Result<SubmitOutcome, StoreError> {
        let mut state = self.state.lock().await;
        if state.failing_submissions.contains(&job.host_id) {
            return Err(StoreError::Unavailable(format!(
                "injected submission failure for {}",
                job.job_id
            )));
        }
        if !state.submitted_ids.insert(job.job_id.clone()) {
            return Ok(SubmitOutcome::Duplicate);
        }
        state.submitted.push((group.to_string(), job.clone()));
        Ok(SubmitOutcome::Enqueued)
    }
}

#[async_trait]
impl LeaseStore for InMemoryStore {
    async fn try_acquire(
        &self,
        scope: &str,
        holder: &WorkerId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.leases.get(scope) {
            if existing.holder != *holder && existing.expires_at > now {
                return Ok(None);
            }
        }
        let ttl = TimeDelta::from_std(ttl).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let lease = Lease {
            scope: scope.to_string(),
            holder: *holder,
            expires_at: now + ttl,
        };
        state.leases.insert(scope.to_string(), lease.clone());
        Ok(Some(lease))
    }

    async fn release(&self, lease: &Lease) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state
            .leases
            .get(&lease.scope)
            .is_some_and(|held| held.holder == lease.holder)
        {
            state.leases.remove(&lease.scope);
        }
        Ok(())
    }
}

#[async_trait]
impl TickLedger for InMemoryStore {
    async fn claim(&self, tick_id: &str, _now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state.ticks.contains_key(tick_id) {
            return Ok(false);
        }
        state.ticks.insert(tick_id.to_string(), None);
        Ok(true)
    }

    async fn finish(
        &self,
        tick_id: &str,
        status: TickStatus,
        _failure_count: usize,
        _now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .ticks
            .insert(tick_id.to_string(), Some(status));
        Ok(())
    }
}
