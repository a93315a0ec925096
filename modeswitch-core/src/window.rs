//! Time windows for event queries.

use chrono::{Duration, NaiveDate, TimeZone};
use chrono_tz::Tz;

use crate::clock::Timestamp;
use crate::error::{ModesError, ModesResult};

/// Days covered on each side of "now" when a query gives no bounds.
pub const DEFAULT_QUERY_DAYS: i64 = 30;

/// Closed window `[start, end]` used by the overlap query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeWindow {
    pub fn new(start: Timestamp, end: Timestamp) -> ModesResult<Self> {
        if end < start {
            return Err(ModesError::Validation(format!(
                "window end {} is before start {}",
                end.to_rfc3339(),
                start.to_rfc3339()
            )));
        }
        Ok(TimeWindow { start, end })
    }

    /// Window of ±DEFAULT_QUERY_DAYS around `now`.
    pub fn around(now: Timestamp) -> Self {
        TimeWindow {
            start: now - Duration::days(DEFAULT_QUERY_DAYS),
            end: now + Duration::days(DEFAULT_QUERY_DAYS),
        }
    }

    /// Parse optional YYYY-MM-DD bounds in `tz`.
    /// - `from`: start of that day, defaults to -DEFAULT_QUERY_DAYS
    /// - `to`: end of that day, defaults to +DEFAULT_QUERY_DAYS
    pub fn from_args(
        from: Option<&str>,
        to: Option<&str>,
        now: Timestamp,
        tz: Tz,
    ) -> ModesResult<Self> {
        let fallback = Self::around(now);

        let start = match from {
            Some(s) => local_day_bound(s, tz, 0, 0, 0)?,
            None => fallback.start,
        };
        let end = match to {
            Some(s) => local_day_bound(s, tz, 23, 59, 59)?,
            None => fallback.end,
        };

        Self::new(start, end)
    }

    /// Inclusive overlap: `start <= window.end && end >= window.start`.
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        start <= self.end && end >= self.start
    }
}

fn local_day_bound(s: &str, tz: Tz, hour: u32, min: u32, sec: u32) -> ModesResult<Timestamp> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
        ModesError::Validation(format!("Invalid date format '{}'. Expected YYYY-MM-DD", s))
    })?;
    let naive = date
        .and_hms_opt(hour, min, sec)
        .ok_or_else(|| ModesError::Validation(format!("Invalid time on {}", s)))?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
        .ok_or_else(|| ModesError::Validation(format!("{} does not exist in {}", naive, tz)))
}
