//! One-shot expiration timers keyed by mode.
//!
//! The arena only records deadlines. A driver task sleeps until
//! [`TimerArena::next_deadline`] and hands due keys back to the engine; the
//! optional waker lets that task notice a newly armed, earlier deadline.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Notify;

use crate::clock::Timestamp;

/// Shortest delay a timer is armed with.
pub const MIN_TIMER_DELAY_SECS: i64 = 1;

#[derive(Default)]
pub struct TimerArena {
    deadlines: HashMap<String, Timestamp>,
    waker: Option<Arc<Notify>>,
}

impl TimerArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_waker(&mut self, waker: Arc<Notify>) {
        self.waker = Some(waker);
    }

    /// Arm the timer for `key`, replacing any armed one. Deadlines closer than
    /// the minimum delay are pushed out to it. Returns the effective deadline.
    pub fn arm(&mut self, key: &str, deadline: Timestamp, now: Timestamp) -> Timestamp {
        let earliest = now + Duration::seconds(MIN_TIMER_DELAY_SECS);
        let effective = deadline.max(earliest);

        self.deadlines.remove(key);
        self.deadlines.insert(key.to_string(), effective);

        if let Some(waker) = &self.waker {
            waker.notify_one();
        }
        effective
    }

    pub fn cancel(&mut self, key: &str) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn deadline(&self, key: &str) -> Option<Timestamp> {
        self.deadlines.get(key).copied()
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn take_due(&mut self, now: Timestamp) -> Vec<String> {
        let mut due: Vec<(Timestamp, String)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, key.clone()))
            .collect();
        due.sort();

        for (_, key) in &due {
            self.deadlines.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }

    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.deadlines.values().min().copied()
    }

    pub fn pending_count(&self) -> usize {
        self.deadlines.len()
    }
}
