//! Reconciliation loop primitives.
//!
//! Helpers shared by the phases of a periodic reconciliation tick:
//!
//! - **Failure aggregation**: per-resource failures are collected into a
//!   [`FailureList`] that each phase returns, and the tick merges lists
//!   instead of sharing a mutable collector.
//! - **Staggering**: [`Stagger`] spreads downstream work over time so a burst
//!   of hosts sharing a schedule boundary does not hit the provider at once.
//! - **Timeouts**: [`exceeds_timeout`] decides whether a scheduled action has
//!   been pending for too long.
//! - **Tick tokens**: [`truncate_to_minute`] and [`timestamp_token`] derive a
//!   stable identifier for the logical time window a tick covers.
//!
//! # Invariants
//!
//! - All helpers are pure; the reference time is always passed in
//! - Failures are never dropped: merging preserves every entry in order

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// Default interval between reconciliation ticks.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Default bound on how long a scheduled stop/start may stay pending.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default lifetime of the exclusive scheduler lease.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(5 * 60);

/// Timestamp format used in tick and job identifiers.
pub const TIMESTAMP_TOKEN_FORMAT: &str = "%Y-%m-%d.%H-%M-%S";

/// A single failure scoped to one resource (usually a host).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// The resource the failure belongs to, if any.
    pub resource: Option<String>,

    /// What was being attempted.
    pub context: String,

    /// The underlying error message.
    pub message: String,
}

impl Failure {
    /// Create a failure for a specific resource.
    pub fn for_resource(
        resource: impl fmt::Display,
        context: impl Into<String>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            resource: Some(resource.to_string()),
            context: context.into(),
            message: error.to_string(),
        }
    }

    /// Create a failure not tied to a single resource.
    pub fn general(context: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            resource: None,
            context: context.into(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{} for '{}': {}", self.context, resource, self.message),
            None => write!(f, "{}: {}", self.context, self.message),
        }
    }
}

/// Ordered list of failures collected during a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureList(Vec<Failure>);

impl FailureList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure.
    pub fn push(&mut self, failure: Failure) {
        self.0.push(failure);
    }

    /// Consume another list, appending its failures after ours.
    #[must_use]
    pub fn merge(mut self, other: FailureList) -> Self {
        self.0.extend(other.0);
        self
    }

    /// Returns true if nothing failed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the failures.
    pub fn iter(&self) -> impl Iterator<Item = &Failure> {
        self.0.iter()
    }

    /// Convert into a result, failing with every recorded failure.
    pub fn into_result(self) -> Result<(), AggregateError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AggregateError { failures: self.0 })
        }
    }
}

impl FromIterator<Failure> for FailureList {
    fn from_iter<I: IntoIterator<Item = Failure>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for FailureList {
    type Item = Failure;
    type IntoIter = std::vec::IntoIter<Failure>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// All failures of a pass, reported together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateError {
    pub failures: Vec<Failure>,
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Spreads work items over time: item `i` waits `i * step`, never more
/// than `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stagger {
    pub step: Duration,
    pub ceiling: Duration,
}

impl Stagger {
    /// One second per item, capped at five minutes.
    pub const DEFAULT: Stagger = Stagger {
        step: Duration::from_secs(1),
        ceiling: Duration::from_secs(5 * 60),
    };

    /// Compute the wait-until instant for the item at `index`.
    pub fn wait_until(&self, now: DateTime<Utc>, index: usize) -> DateTime<Utc> {
        let index = u32::try_from(index).unwrap_or(u32::MAX);
        let delay = self
            .step
            .checked_mul(index)
            .map_or(self.ceiling, |d| d.min(self.ceiling));
        now + to_delta(delay)
    }
}

impl Default for Stagger {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Returns true if `reference - scheduled` is strictly greater than `timeout`.
pub fn exceeds_timeout(
    reference: DateTime<Utc>,
    scheduled: DateTime<Utc>,
    timeout: Duration,
) -> bool {
    reference.signed_duration_since(scheduled) > to_delta(timeout)
}

/// Truncate an instant to the start of its minute.
pub fn truncate_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .duration_trunc(TimeDelta::minutes(1))
        .unwrap_or(instant)
}

/// Format the minute containing `instant` as a tick/job timestamp token.
pub fn timestamp_token(instant: DateTime<Utc>) -> String {
    truncate_to_minute(instant)
        .format(TIMESTAMP_TOKEN_FORMAT)
        .to_string()
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
