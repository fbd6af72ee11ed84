//! Staleness policy for cached library responses
//!
//! Elapsed time is measured on the calendar (whole years and months first, then
//! the remaining days, hours, minutes and seconds) and converted to minutes with
//! fixed weights, so a month always counts as 43800 minutes and a year as 525600.

use chrono::{DateTime, Datelike, Months, TimeDelta, Utc};

/// Default re-check interval in minutes
pub const DEFAULT_INTERVAL_MINUTES: u32 = 10;

const MINUTES_PER_YEAR: f64 = 525_600.0;
const MINUTES_PER_MONTH: f64 = 43_800.0;
const MINUTES_PER_DAY: f64 = 1_440.0;
const MINUTES_PER_HOUR: f64 = 60.0;

/// Calendar breakdown of the distance between two instants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarSpan {
    pub years: u32,
    pub months: u32,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: f64,
}

impl CalendarSpan {
    /// Absolute calendar distance between `a` and `b`
    pub fn between(a: DateTime<Utc>, b: DateTime<Utc>) -> Self {
        let (start, end) = if a <= b { (a, b) } else { (b, a) };

        let approx_months =
            (end.year() - start.year()) * 12 + (end.month() as i32 - start.month() as i32);
        let mut months = approx_months.max(0) as u32;
        let mut anchor = start;
        while months > 0 {
            if let Some(candidate) = start.checked_add_months(Months::new(months)) {
                if candidate <= end {
                    anchor = candidate;
                    break;
                }
            }
            months -= 1;
        }

        let rest: TimeDelta = end - anchor;
        let total_minutes = rest.num_minutes();
        let leftover = rest - TimeDelta::minutes(total_minutes);

        Self {
            years: months / 12,
            months: months % 12,
            days: rest.num_days(),
            hours: rest.num_hours() % 24,
            minutes: total_minutes % 60,
            seconds: leftover.num_nanoseconds().unwrap_or_default() as f64 / 1e9,
        }
    }

    pub fn as_minutes(&self) -> f64 {
        self.years as f64 * MINUTES_PER_YEAR
            + self.months as f64 * MINUTES_PER_MONTH
            + self.days as f64 * MINUTES_PER_DAY
            + self.hours as f64 * MINUTES_PER_HOUR
            + self.minutes as f64
            + self.seconds / 60.0
    }
}

/// Minutes elapsed between `retrieved_at` and `now`
pub fn elapsed_minutes(retrieved_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    CalendarSpan::between(retrieved_at, now).as_minutes()
}

/// Whether an entry retrieved at `retrieved_at` is due for a re-fetch at `now`
///
/// The boundary is strict: exactly `interval_minutes` elapsed is still fresh.
pub fn is_stale(retrieved_at: DateTime<Utc>, now: DateTime<Utc>, interval_minutes: u32) -> bool {
    elapsed_minutes(retrieved_at, now) > interval_minutes as f64
}
