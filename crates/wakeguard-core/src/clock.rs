//! Instant arithmetic for configured offsets.
//!
//! Config values are unsigned and may exceed what `TimeDelta` can hold;
//! these helpers saturate instead of panicking.

use chrono::{DateTime, TimeDelta, Utc};

/// `ms` as a `TimeDelta`, clamped to `TimeDelta::MAX`.
pub(crate) fn millis(ms: u64) -> TimeDelta {
    i64::try_from(ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .unwrap_or(TimeDelta::MAX)
}

/// `minutes` as a `TimeDelta`, clamped to `TimeDelta::MAX`.
pub(crate) fn minutes(minutes: u64) -> TimeDelta {
    i64::try_from(minutes)
        .ok()
        .and_then(TimeDelta::try_minutes)
        .unwrap_or(TimeDelta::MAX)
}

/// `at + delta`, or the latest representable instant.
pub(crate) fn after(at: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    at.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
