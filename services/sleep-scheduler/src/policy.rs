//! Weekly sleep-schedule policy and the calculator contract.
//!
//! A host's policy describes when it should be powered on: a daily window in
//! the host owner's time zone, minus whole weekdays that are off entirely.
//! The calculator turns a reference instant into the next start and the next
//! stop instants, which the repair engine persists on the host.

use std::collections::HashSet;

use chrono::{
    DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::host::Host;

/// How many days ahead to look for the next transition.
const SEARCH_HORIZON_DAYS: i64 = 15;

/// Upper bound on a daylight-saving gap.
const MAX_DST_GAP_MINUTES: i64 = 3 * 60;

/// Errors for malformed schedule policies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("daily start and stop times must both be set or both be unset")]
    IncompleteDailyWindow,

    #[error("daily start and stop times must differ")]
    EmptyDailyWindow,

    #[error("schedule keeps the host off on every day of the week")]
    AlwaysOff,

    #[error("schedule never turns the host off")]
    NeverOff,

    #[error("no {action} transition within {horizon_days} days")]
    NoTransition {
        action: &'static str,
        horizon_days: i64,
    },

    #[error("unreadable schedule policy: {0}")]
    Unreadable(String),
}

/// Recurring weekly window during which a host should be on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    /// Days on which the host stays off all day.
    #[serde(default)]
    pub whole_weekdays_off: Vec<Weekday>,

    /// Local time at which the host starts on working days.
    pub daily_start_time: Option<NaiveTime>,

    /// Local time at which the host stops on working days.
    pub daily_stop_time: Option<NaiveTime>,

    /// Time zone the schedule is expressed in.
    pub time_zone: Tz,
}

impl Default for WeeklySchedule {
    fn default() -> Self {
        Self {
            whole_weekdays_off: vec![Weekday::Sat, Weekday::Sun],
            daily_start_time: None,
            daily_stop_time: None,
            time_zone: Tz::UTC,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Start,
    Stop,
}

impl Transition {
    fn name(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Stop => "stop",
        }
    }
}

impl WeeklySchedule {
    /// Check that the schedule has both on and off periods.
    pub fn validate(&self) -> Result<(), PolicyError> {
        match (self.daily_start_time, self.daily_stop_time) {
            (Some(start), Some(stop)) if start == stop => return Err(PolicyError::EmptyDailyWindow),
            (Some(_), None) | (None, Some(_)) => return Err(PolicyError::IncompleteDailyWindow),
            _ => {}
        }

        let days_off: HashSet<u32> = self
            .whole_weekdays_off
            .iter()
            .map(|d| d.num_days_from_monday())
            .collect();
        if days_off.len() == 7 {
            return Err(PolicyError::AlwaysOff);
        }
        if days_off.is_empty() && self.daily_start_time.is_none() {
            return Err(PolicyError::NeverOff);
        }

        Ok(())
    }

    /// Whether the host should be on at the given local wall-clock time.
    ///
    /// The weekday of the local date decides whether the day is off, including
    /// the after-midnight part of an overnight window.
    pub fn is_on_at(&self, local: NaiveDateTime) -> bool {
        if self.whole_weekdays_off.contains(&local.weekday()) {
            return false;
        }

        match (self.daily_start_time, self.daily_stop_time) {
            (Some(start), Some(stop)) => {
                let t = local.time();
                if start < stop {
                    start <= t && t < stop
                } else {
                    t >= start || t < stop
                }
            }
            _ => true,
        }
    }

    fn local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.time_zone).naive_local()
    }

    /// Resolve a local wall-clock time to an instant.
    ///
    /// Ambiguous times take the earlier instant. A time skipped by a
    /// daylight-saving gap resolves to the first minute after the gap.
    fn resolve(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        (0..=MAX_DST_GAP_MINUTES)
            .filter_map(|minutes| naive.checked_add_signed(TimeDelta::minutes(minutes)))
            .find_map(|candidate| self.time_zone.from_local_datetime(&candidate).earliest())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Instants at which the on/off state can change, in ascending order.
    fn boundaries_after(&self, reference: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let first_day = self.local(reference).date() - TimeDelta::days(1);
        let times: Vec<NaiveTime> = std::iter::once(NaiveTime::MIN)
            .chain(self.daily_start_time)
            .chain(self.daily_stop_time)
            .collect();

        let mut boundaries: Vec<DateTime<Utc>> = (0..=SEARCH_HORIZON_DAYS)
            .filter_map(|offset| first_day.checked_add_signed(TimeDelta::days(offset)))
            .flat_map(|day: NaiveDate| times.iter().map(move |t| day.and_time(*t)))
            .filter_map(|naive| self.resolve(naive))
            .filter(|instant| *instant > reference)
            .collect();
        boundaries.sort();
        boundaries.dedup();
        boundaries
    }

    fn next_transition(
        &self,
        reference: DateTime<Utc>,
        wanted: Transition,
    ) -> Result<DateTime<Utc>, PolicyError> {
        self.validate()?;

        self.boundaries_after(reference)
            .into_iter()
            .find(|boundary| {
                let before = self.is_on_at(self.local(*boundary - TimeDelta::seconds(1)));
                let after = self.is_on_at(self.local(*boundary));
                match wanted {
                    Transition::Start => !before && after,
                    Transition::Stop => before && !after,
                }
            })
            .ok_or(PolicyError::NoTransition {
                action: wanted.name(),
                horizon_days: SEARCH_HORIZON_DAYS,
            })
    }

    /// Next instant strictly after `reference` at which the host should start.
    pub fn next_start(&self, reference: DateTime<Utc>) -> Result<DateTime<Utc>, PolicyError> {
        self.next_transition(reference, Transition::Start)
    }

    /// Next instant strictly after `reference` at which the host should stop.
    pub fn next_stop(&self, reference: DateTime<Utc>) -> Result<DateTime<Utc>, PolicyError> {
        self.next_transition(reference, Transition::Stop)
    }
}

/// A schedule policy as stored on a host record.
///
/// Decoding happens when the record is loaded, but a policy that does not
/// decode is kept as raw JSON and only fails the calculations for its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredPolicy {
    Weekly(WeeklySchedule),
    Unreadable {
        raw: serde_json::Value,
        reason: String,
    },
}

impl StoredPolicy {
    /// Decode a stored JSON policy.
    pub fn from_json(raw: serde_json::Value) -> Self {
        match serde_json::from_value(raw.clone()) {
            Ok(schedule) => StoredPolicy::Weekly(schedule),
            Err(e) => StoredPolicy::Unreadable {
                raw,
                reason: e.to_string(),
            },
        }
    }

    /// The decoded schedule, or why it could not be decoded.
    pub fn schedule(&self) -> Result<&WeeklySchedule, PolicyError> {
        match self {
            StoredPolicy::Weekly(schedule) => Ok(schedule),
            StoredPolicy::Unreadable { reason, .. } => Err(PolicyError::Unreadable(reason.clone())),
        }
    }
}

impl Default for StoredPolicy {
    fn default() -> Self {
        StoredPolicy::Weekly(WeeklySchedule::default())
    }
}

impl From<WeeklySchedule> for StoredPolicy {
    fn from(schedule: WeeklySchedule) -> Self {
        StoredPolicy::Weekly(schedule)
    }
}

impl Serialize for StoredPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StoredPolicy::Weekly(schedule) => schedule.serialize(serializer),
            StoredPolicy::Unreadable { raw, .. } => raw.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for StoredPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(StoredPolicy::from_json)
    }
}

/// Turns a reference instant into a host's next scheduled start/stop.
///
/// Implementations must be deterministic, must return instants strictly
/// after the reference, and must fail when the host's policy is malformed.
pub trait ScheduleCalculator: Send + Sync {
    /// Next scheduled start after `reference`.
    fn next_start(&self, host: &Host, reference: DateTime<Utc>)
        -> Result<DateTime<Utc>, PolicyError>;

    /// Next scheduled stop after `reference`.
    fn next_stop(&self, host: &Host, reference: DateTime<Utc>)
        -> Result<DateTime<Utc>, PolicyError>;

    /// Next scheduled start and stop after `reference`.
    fn next_start_and_stop(
        &self,
        host: &Host,
        reference: DateTime<Utc>,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), PolicyError> {
        Ok((self.next_start(host, reference)?, self.next_stop(host, reference)?))
    }
}

/// Calculator that evaluates the weekly policy stored on each host.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeeklyScheduleCalculator;

impl ScheduleCalculator for WeeklyScheduleCalculator {
    fn next_start(
        &self,
        host: &Host,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, PolicyError> {
        host.sleep_schedule.policy.schedule()?.next_start(reference)
    }

    fn next_stop(
        &self,
        host: &Host,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, PolicyError> {
        host.sleep_schedule.policy.schedule()?.next_stop(reference)
    }
}
