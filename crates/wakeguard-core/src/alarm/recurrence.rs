//! Next-trigger computation for weekly recurring alarms.
//!
//! Works in any [`TimeZone`] so the caller decides what "07:00 on Wednesday"
//! means. Local times skipped by a DST transition resolve to the first valid
//! instant after the gap; repeated local times resolve to the earlier one.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone};

use super::definition::AlarmDefinition;

/// Longest DST gap we walk across when resolving a local time.
const MAX_GAP_MINUTES: i64 = 4 * 60;

/// Smallest instant strictly after `now` matching the alarm's time of day
/// on an active weekday.
///
/// An empty weekday set fires on the next occurrence of the time of day,
/// today or tomorrow. Returns `None` only if no local time in the following
/// eight days can be resolved in `now`'s zone.
pub fn next_trigger<Tz: TimeZone>(def: &AlarmDefinition, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let today = now.naive_local().date();
    let time = def.time_of_day();

    // Offset 7 is today one week later, reached when today is the only
    // active day and its time has passed.
    for offset in 0..=7 {
        let date = today + Duration::days(offset);
        if def.is_recurring() && !def.weekdays.contains(date.weekday()) {
            continue;
        }
        if let Some(candidate) = resolve_local(&tz, date.and_time(time)) {
            if candidate > *now {
                return Some(candidate);
            }
        }
    }
    None
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    if let Some(t) = tz.from_local_datetime(&local).earliest() {
        return Some(t);
    }
    (1..=MAX_GAP_MINUTES).find_map(|m| {
        tz.from_local_datetime(&(local + Duration::minutes(m)))
            .earliest()
    })
}
