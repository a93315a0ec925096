//! Diagnostic ledger of calendar events.
//!
//! Subscribes to the event store, tracks every known event with its phase,
//! and archives events that were deleted or that ended more than a day ago.
//! Archived events are dropped a week after they end. Nothing here is
//! persisted.

use std::collections::HashMap;

use chrono::Duration;
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Timestamp;
use crate::event::CalendarEvent;
use crate::event_store::EventsChanged;

/// How long an ended event stays tracked before the sweep archives it.
pub const ARCHIVE_AFTER_DAYS: i64 = 1;

/// How long an archived event is kept after its end.
pub const RETAIN_ARCHIVE_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPhase {
    Upcoming,
    Running,
    Ended,
}

impl EventPhase {
    pub fn of(event: &CalendarEvent, now: Timestamp) -> Self {
        if now < event.start {
            EventPhase::Upcoming
        } else if now < event.end {
            EventPhase::Running
        } else {
            EventPhase::Ended
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReason {
    Deleted,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivedEvent {
    pub event: CalendarEvent,
    pub reason: ArchiveReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub event: CalendarEvent,
    pub phase: EventPhase,
    pub duration_seconds: i64,
}

/// Point-in-time copy of the ledger for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    pub entries: Vec<LedgerEntry>,
    pub archived: Vec<ArchivedEvent>,
}

#[derive(Debug, Default)]
pub struct EventLedger {
    tracked: HashMap<String, CalendarEvent>,
    archive: HashMap<String, ArchivedEvent>,
}

impl EventLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a set of events, e.g. the store contents at startup.
    pub fn seed(&mut self, events: &[CalendarEvent]) {
        for event in events {
            self.tracked.insert(event.uid.clone(), event.clone());
        }
    }

    /// Reconcile one mode's partition with a store notification.
    pub fn on_events_changed(&mut self, change: &EventsChanged) {
        let incoming: HashMap<&str, &CalendarEvent> = change
            .events
            .iter()
            .map(|e| (e.uid.as_str(), e))
            .collect();

        let removed: Vec<String> = self
            .tracked
            .values()
            .filter(|e| e.mode_key == change.mode_key && !incoming.contains_key(e.uid.as_str()))
            .map(|e| e.uid.clone())
            .collect();

        for uid in removed {
            if let Some(event) = self.tracked.remove(&uid) {
                info!(mode = %event.mode_key, uid = %uid, "Archiving deleted event");
                self.archive.insert(
                    uid,
                    ArchivedEvent {
                        event,
                        reason: ArchiveReason::Deleted,
                    },
                );
            }
        }

        for event in &change.events {
            self.tracked.insert(event.uid.clone(), event.clone());
        }

        debug!(
            mode = %change.mode_key,
            tracked = self.tracked.len(),
            archived = self.archive.len(),
            "Ledger updated"
        );
    }

    /// Archive tracked events that ended at least a day before `now`, and
    /// drop archived events that ended more than a week before it.
    /// Returns how many were archived.
    pub fn sweep(&mut self, now: Timestamp) -> usize {
        let finished: Vec<String> = self
            .tracked
            .values()
            .filter(|e| now >= e.end + Duration::days(ARCHIVE_AFTER_DAYS))
            .map(|e| e.uid.clone())
            .collect();

        for uid in &finished {
            if let Some(event) = self.tracked.remove(uid) {
                self.archive.insert(
                    uid.clone(),
                    ArchivedEvent {
                        event,
                        reason: ArchiveReason::Finished,
                    },
                );
            }
        }

        let before = self.archive.len();
        self.archive
            .retain(|_, archived| now < archived.event.end + Duration::days(RETAIN_ARCHIVE_DAYS));
        let dropped = before - self.archive.len();

        if !finished.is_empty() || dropped > 0 {
            info!(archived = finished.len(), dropped, "Swept event ledger");
        }
        finished.len()
    }

    /// Tracked events with their phase at `now`, ordered by start.
    pub fn entries(&self, now: Timestamp) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .tracked
            .values()
            .map(|event| LedgerEntry {
                phase: EventPhase::of(event, now),
                duration_seconds: event.duration().num_seconds(),
                event: event.clone(),
            })
            .collect();
        entries.sort_by(|a, b| {
            a.event
                .start
                .cmp(&b.event.start)
                .then(a.event.uid.cmp(&b.event.uid))
        });
        entries
    }

    /// Archived events, oldest end first.
    pub fn archived(&self) -> Vec<&ArchivedEvent> {
        let mut archived: Vec<&ArchivedEvent> = self.archive.values().collect();
        archived.sort_by(|a, b| a.event.end.cmp(&b.event.end));
        archived
    }

    pub fn snapshot(&self, now: Timestamp) -> LedgerSnapshot {
        LedgerSnapshot {
            entries: self.entries(now),
            archived: self.archived().into_iter().cloned().collect(),
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NewEvent;
    use chrono::DateTime;

    fn ts(s: &str) -> Timestamp {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn event(mode: &str, start: &str, end: &str) -> CalendarEvent {
        CalendarEvent::new(mode, NewEvent::new(ts(start), ts(end), "x"), ts("2025-03-01T00:00:00Z"))
    }

    #[test]
    fn test_phases() {
        let e = event("home", "2025-03-20T10:00:00Z", "2025-03-20T11:00:00Z");
        assert_eq!(EventPhase::of(&e, ts("2025-03-20T09:00:00Z")), EventPhase::Upcoming);
        assert_eq!(EventPhase::of(&e, ts("2025-03-20T10:00:00Z")), EventPhase::Running);
        assert_eq!(EventPhase::of(&e, ts("2025-03-20T11:00:00Z")), EventPhase::Ended);
    }

    #[test]
    fn test_removed_events_are_archived_per_partition() {
        let home = event("home", "2025-03-20T10:00:00Z", "2025-03-20T11:00:00Z");
        let bris = event("bris", "2025-03-20T10:00:00Z", "2025-03-20T11:00:00Z");

        let mut ledger = EventLedger::new();
        ledger.seed(&[home.clone(), bris.clone()]);

        // An empty home partition must not touch the bris event
        ledger.on_events_changed(&EventsChanged {
            mode_key: "home".into(),
            events: vec![],
        });

        assert_eq!(ledger.tracked_count(), 1);
        let archived = ledger.archived();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].event.uid, home.uid);
        assert_eq!(archived[0].reason, ArchiveReason::Deleted);
    }

    #[test]
    fn test_sweep_archives_a_day_after_end() {
        let e = event("home", "2025-03-20T10:00:00Z", "2025-03-20T11:00:00Z");
        let mut ledger = EventLedger::new();
        ledger.on_events_changed(&EventsChanged {
            mode_key: "home".into(),
            events: vec![e.clone()],
        });

        assert_eq!(ledger.sweep(ts("2025-03-21T10:59:59Z")), 0);
        assert_eq!(ledger.sweep(ts("2025-03-21T11:00:00Z")), 1);
        assert_eq!(ledger.tracked_count(), 0);
        assert_eq!(ledger.archived()[0].reason, ArchiveReason::Finished);
    }

    #[test]
    fn test_sweep_drops_old_archive_entries() {
        let mut ledger = EventLedger::new();
        let mut day = ts("2025-01-01T10:00:00Z");

        for _ in 0..100 {
            let e = CalendarEvent::new(
                "home",
                NewEvent::new(day, day + Duration::hours(1), "x"),
                day,
            );
            ledger.on_events_changed(&EventsChanged {
                mode_key: "home".into(),
                events: vec![e],
            });
            ledger.on_events_changed(&EventsChanged {
                mode_key: "home".into(),
                events: vec![],
            });
            ledger.sweep(day);
            day += Duration::days(3);
        }

        // Only events that ended within the last week survive
        let archived = ledger.archived();
        assert!(archived.len() <= 3, "archive kept {} events", archived.len());
        assert!(archived.iter().all(|a| a.reason == ArchiveReason::Deleted));
    }

    #[test]
    fn test_snapshot_lists_tracked_and_archived() {
        let kept = event("home", "2025-03-20T10:00:00Z", "2025-03-20T11:00:00Z");
        let gone = event("bris", "2025-03-20T12:00:00Z", "2025-03-20T13:00:00Z");
        let mut ledger = EventLedger::new();
        ledger.seed(&[kept.clone(), gone]);
        ledger.on_events_changed(&EventsChanged {
            mode_key: "bris".into(),
            events: vec![],
        });

        let snapshot = ledger.snapshot(ts("2025-03-20T09:00:00Z"));
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].event.uid, kept.uid);
        assert_eq!(snapshot.entries[0].phase, EventPhase::Upcoming);
        assert_eq!(snapshot.archived.len(), 1);
        assert_eq!(snapshot.archived[0].reason, ArchiveReason::Deleted);
    }

    #[test]
    fn test_entries_report_duration() {
        let e = event("home", "2025-03-20T10:00:00Z", "2025-03-20T11:30:00Z");
        let mut ledger = EventLedger::new();
        ledger.seed(std::slice::from_ref(&e));
        let entries = ledger.entries(ts("2025-03-20T10:15:00Z"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].phase, EventPhase::Running);
        assert_eq!(entries[0].duration_seconds, 90 * 60);
    }
}
