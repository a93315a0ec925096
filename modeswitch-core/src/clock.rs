//! Time source for the engine.
//!
//! All instants the engine handles are zone-aware and carry their UTC offset.
//! The clock fixes the zone used for "now" and for interpreting naive input.

use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use chrono_tz::Tz;

/// A zone-aware instant.
pub type Timestamp = DateTime<FixedOffset>;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    fn time_zone(&self) -> Tz;
}

/// Wall clock in a fixed time zone.
#[derive(Debug, Clone)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        SystemClock { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now().with_timezone(&self.tz).fixed_offset()
    }

    fn time_zone(&self) -> Tz {
        self.tz
    }
}

/// Clock that only moves when told to. Used by tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    tz: Tz,
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(tz: Tz, start: Timestamp) -> Self {
        ManualClock {
            tz,
            now: Mutex::new(start),
        }
    }

    /// Start at a local wall-clock time in `tz`.
    pub fn at(tz: Tz, year: i32, month: u32, day: u32, hour: u32, min: u32) -> Self {
        let start = tz
            .with_ymd_and_hms(year, month, day, hour, min, 0)
            .earliest()
            .map(|dt| dt.fixed_offset())
            .unwrap_or_else(|| Utc::now().with_timezone(&tz).fixed_offset());
        Self::new(tz, start)
    }

    pub fn set(&self, instant: Timestamp) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn time_zone(&self) -> Tz {
        self.tz
    }
}
