#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Once};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use hostsleep_id::HostId;
use hostsleep_scheduler::clock::FixedClock;
use hostsleep_scheduler::context::TickContext;
use hostsleep_scheduler::host::{Host, HostKind, HostStatus, ScheduleState};
use hostsleep_scheduler::policy::{PolicyError, ScheduleCalculator};
use hostsleep_scheduler::store::memory::InMemoryStore;

pub const START_OFFSET_HOURS: i64 = 20;
pub const STOP_OFFSET_HOURS: i64 = 6;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info,hostsleep_scheduler=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Tuesday, mid-minute so the tick token and the reference differ.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 30).unwrap()
}

/// Calculator returning fixed offsets from the reference, failing for chosen hosts.
#[derive(Debug, Clone)]
pub struct OffsetCalculator {
    pub start_offset: TimeDelta,
    pub stop_offset: TimeDelta,
    pub failing: HashSet<HostId>,
}

impl Default for OffsetCalculator {
    fn default() -> Self {
        Self {
            start_offset: TimeDelta::hours(START_OFFSET_HOURS),
            stop_offset: TimeDelta::hours(STOP_OFFSET_HOURS),
            failing: HashSet::new(),
        }
    }
}

impl OffsetCalculator {
    pub fn failing_for(ids: impl IntoIterator<Item = HostId>) -> Self {
        Self {
            failing: ids.into_iter().collect(),
            ..Default::default()
        }
    }

    fn check(&self, host: &Host) -> Result<(), PolicyError> {
        if self.failing.contains(&host.id) {
            return Err(PolicyError::IncompleteDailyWindow);
        }
        Ok(())
    }
}

impl ScheduleCalculator for OffsetCalculator {
    fn next_start(
        &self,
        host: &Host,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, PolicyError> {
        self.check(host)?;
        Ok(reference + self.start_offset)
    }

    fn next_stop(
        &self,
        host: &Host,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, PolicyError> {
        self.check(host)?;
        Ok(reference + self.stop_offset)
    }
}

/// An eligible user host with valid future next times.
pub fn host(status: HostStatus) -> Host {
    Host {
        id: HostId::new(),
        started_by: "alice".to_string(),
        kind: HostKind::Spawn,
        status,
        no_expiration: true,
        sleep_schedule: ScheduleState {
            next_start_time: Some(t0() + TimeDelta::hours(10)),
            next_stop_time: Some(t0() + TimeDelta::hours(4)),
            ..Default::default()
        },
    }
}

/// A running host whose stop time has arrived.
pub fn due_to_stop() -> Host {
    let mut h = host(HostStatus::Running);
    h.sleep_schedule.next_stop_time = Some(t0() - TimeDelta::minutes(1));
    h
}

/// A stopped host whose start time has arrived.
pub fn due_to_start() -> Host {
    let mut h = host(HostStatus::Stopped);
    h.sleep_schedule.next_start_time = Some(t0() - TimeDelta::minutes(1));
    h
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<FixedClock>,
    pub ctx: TickContext,
}

impl Harness {
    pub fn new(hosts: impl IntoIterator<Item = Host>) -> Self {
        Self::with_calculator(hosts, OffsetCalculator::default())
    }

    pub fn with_calculator(
        hosts: impl IntoIterator<Item = Host>,
        calculator: OffsetCalculator,
    ) -> Self {
        init_tracing();
        let store = Arc::new(InMemoryStore::with_hosts(hosts));
        let clock = Arc::new(FixedClock::new(t0()));
        let ctx = TickContext::in_memory(store.clone())
            .with_calculator(Arc::new(calculator))
            .with_clock(clock.clone());
        Self { store, clock, ctx }
    }
}
