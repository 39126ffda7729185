//! Explicit environment handed to every tick.

use std::sync::Arc;
use std::time::Duration;

use hostsleep_reconcile::{Stagger, DEFAULT_ACTION_TIMEOUT};

use crate::clock::{Clock, SystemClock};
use crate::policy::{ScheduleCalculator, WeeklyScheduleCalculator};
use crate::store::memory::InMemoryStore;
use crate::store::{HostStore, JobQueue, SettingsSource};

/// Everything a tick needs: stores, settings, the calculator, and time.
#[derive(Clone)]
pub struct TickContext {
    pub hosts: Arc<dyn HostStore>,
    pub settings: Arc<dyn SettingsSource>,
    pub queue: Arc<dyn JobQueue>,
    pub calculator: Arc<dyn ScheduleCalculator>,
    pub clock: Arc<dyn Clock>,
    /// How long a scheduled action may stay pending before it is rescheduled.
    pub action_timeout: Duration,
    pub stagger: Stagger,
}

impl TickContext {
    pub fn new(
        hosts: Arc<dyn HostStore>,
        settings: Arc<dyn SettingsSource>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            hosts,
            settings,
            queue,
            calculator: Arc::new(WeeklyScheduleCalculator),
            clock: Arc::new(SystemClock),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            stagger: Stagger::DEFAULT,
        }
    }

    /// Context backed entirely by one in-memory store.
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self::new(store.clone(), store.clone(), store)
    }

    pub fn with_calculator(mut self, calculator: Arc<dyn ScheduleCalculator>) -> Self {
        self.calculator = calculator;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_stagger(mut self, stagger: Stagger) -> Self {
        self.stagger = stagger;
        self
    }
}
