//! Persisted, partitioned collection of calendar events.
//!
//! All partitions share one storage record. A mutation builds the next
//! collection, saves it, and only then replaces the in-memory copy, so a failed
//! write leaves the store at its last persisted state.
//!
//! Change notifications are queued per mode and delivered by
//! [`EventStore::publish_pending`], which lets a caller finish dependent
//! mutations (the cross-mode link) before subscribers observe anything.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Timestamp;
use crate::error::{ModesError, ModesResult};
use crate::event::{CalendarEvent, EventPatch, NewEvent, touches_link_keys, validate_window};
use crate::storage::{EVENTS_KEY, Storage, load_record, save_record};
use crate::window::TimeWindow;

/// Who is asking for a mutation. Link-derived events may only be touched by
/// the link itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    External,
    Link,
}

/// Payload delivered to subscribers after a persisted mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct EventsChanged {
    pub mode_key: String,
    /// Every event currently stored for `mode_key`, in store order.
    pub events: Vec<CalendarEvent>,
}

pub type Subscriber = Box<dyn Fn(&EventsChanged) + Send + Sync>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct EventCollection {
    #[serde(default)]
    events: Vec<CalendarEvent>,
}

pub struct EventStore {
    storage: Arc<dyn Storage>,
    events: Vec<CalendarEvent>,
    subscribers: Vec<Subscriber>,
    pending: Vec<String>,
}

impl EventStore {
    /// Load the collection, dropping records that break the store invariants.
    pub fn load(storage: Arc<dyn Storage>) -> ModesResult<Self> {
        let collection: EventCollection =
            load_record(storage.as_ref(), EVENTS_KEY)?.unwrap_or_default();

        let mut seen = HashSet::new();
        let mut events = Vec::with_capacity(collection.events.len());
        for event in collection.events {
            if event.uid.is_empty() {
                warn!(mode = %event.mode_key, "Dropping stored event without uid");
                continue;
            }
            if event.end <= event.start {
                warn!(
                    mode = %event.mode_key,
                    uid = %event.uid,
                    "Dropping stored event whose end is not after its start"
                );
                continue;
            }
            if !seen.insert(event.uid.clone()) {
                warn!(mode = %event.mode_key, uid = %event.uid, "Dropping duplicate stored event");
                continue;
            }
            events.push(event);
        }

        debug!(count = events.len(), "Loaded event collection");

        Ok(EventStore {
            storage,
            events,
            subscribers: Vec::new(),
            pending: Vec::new(),
        })
    }

    /// Register a subscriber. Subscribers run in registration order.
    pub fn subscribe(&mut self, subscriber: Subscriber) {
        self.subscribers.push(subscriber);
    }

    pub fn all(&self) -> &[CalendarEvent] {
        &self.events
    }

    /// Events of one partition, in store order.
    pub fn events_for(&self, mode_key: &str) -> Vec<CalendarEvent> {
        self.events
            .iter()
            .filter(|e| e.mode_key == mode_key)
            .cloned()
            .collect()
    }

    pub fn get(&self, uid: &str, mode_key: &str) -> Option<&CalendarEvent> {
        self.events
            .iter()
            .find(|e| e.uid == uid && e.mode_key == mode_key)
    }

    /// The event in `target_mode` derived from `source_uid`, if any.
    pub fn find_linked(&self, target_mode: &str, source_uid: &str) -> Option<&CalendarEvent> {
        self.events.iter().find(|e| {
            e.mode_key == target_mode && e.is_linked() && e.link_source_uid() == Some(source_uid)
        })
    }

    /// Events of `mode_key` overlapping `window` (inclusive on both ends).
    pub fn query(&self, mode_key: &str, window: &TimeWindow) -> Vec<CalendarEvent> {
        self.events
            .iter()
            .filter(|e| e.mode_key == mode_key && window.overlaps(e.start, e.end))
            .cloned()
            .collect()
    }

    pub fn create(
        &mut self,
        mode_key: &str,
        draft: NewEvent,
        origin: Origin,
        created: Timestamp,
    ) -> ModesResult<CalendarEvent> {
        validate_window(draft.start, draft.end)?;
        if origin == Origin::External && touches_link_keys(&draft.extra) {
            return Err(ModesError::Policy(
                "link metadata can only be written by the mode link".into(),
            ));
        }

        let event = CalendarEvent::new(mode_key, draft, created);

        let mut next = self.events.clone();
        next.push(event.clone());
        self.commit(next, mode_key)?;

        debug!(mode = %mode_key, uid = %event.uid, "Created event");
        Ok(event)
    }

    pub fn update(
        &mut self,
        uid: &str,
        mode_key: &str,
        patch: &EventPatch,
        origin: Origin,
    ) -> ModesResult<CalendarEvent> {
        let index = self.locate(uid, mode_key)?;
        if origin == Origin::External {
            if self.events[index].is_linked() {
                return Err(ModesError::Policy(format!(
                    "event {} is managed by the mode link and cannot be edited",
                    uid
                )));
            }
            if touches_link_keys(&patch.extra) {
                return Err(ModesError::Policy(
                    "link metadata can only be written by the mode link".into(),
                ));
            }
        }

        let updated = patch.applied_to(&self.events[index]);
        validate_window(updated.start, updated.end)?;

        let mut next = self.events.clone();
        next[index] = updated.clone();
        self.commit(next, mode_key)?;

        debug!(mode = %mode_key, uid = %uid, "Updated event");
        Ok(updated)
    }

    pub fn delete(
        &mut self,
        uid: &str,
        mode_key: &str,
        origin: Origin,
    ) -> ModesResult<CalendarEvent> {
        let index = self.locate(uid, mode_key)?;
        if origin == Origin::External && self.events[index].is_linked() {
            return Err(ModesError::Policy(format!(
                "event {} is managed by the mode link and cannot be deleted",
                uid
            )));
        }

        let mut next = self.events.clone();
        let removed = next.remove(index);
        self.commit(next, mode_key)?;

        debug!(mode = %mode_key, uid = %uid, "Deleted event");
        Ok(removed)
    }

    /// Deliver one notification per mode changed since the last call.
    pub fn publish_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for mode_key in pending {
            let change = EventsChanged {
                events: self.events_for(&mode_key),
                mode_key,
            };
            for subscriber in &self.subscribers {
                subscriber(&change);
            }
        }
    }

    fn locate(&self, uid: &str, mode_key: &str) -> ModesResult<usize> {
        if uid.trim().is_empty() {
            return Err(ModesError::Validation("missing event uid".into()));
        }
        self.events
            .iter()
            .position(|e| e.uid == uid && e.mode_key == mode_key)
            .ok_or_else(|| ModesError::NotFound(format!("event {} in mode '{}'", uid, mode_key)))
    }

    fn commit(&mut self, next: Vec<CalendarEvent>, mode_key: &str) -> ModesResult<()> {
        let collection = EventCollection { events: next };
        save_record(self.storage.as_ref(), EVENTS_KEY, &collection)?;
        self.events = collection.events;
        if !self.pending.iter().any(|m| m == mode_key) {
            self.pending.push(mode_key.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LINK_SOURCE_UID_KEY, LINKED_FROM_KEY};
    use crate::storage::MemoryStorage;
    use chrono::{DateTime, Duration};
    use serde_json::json;
    use std::sync::Mutex;

    fn ts(s: &str) -> Timestamp {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn make_store() -> (Arc<MemoryStorage>, EventStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = EventStore::load(storage.clone()).unwrap();
        (storage, store)
    }

    fn draft(start: &str, end: &str) -> NewEvent {
        NewEvent::new(ts(start), ts(end), "Test")
    }

    #[test]
    fn test_create_persists_and_reloads() {
        let (storage, mut store) = make_store();
        let created = store
            .create(
                "home",
                draft("2025-03-20T10:00:00Z", "2025-03-20T11:00:00Z"),
                Origin::External,
                ts("2025-03-19T00:00:00Z"),
            )
            .unwrap();

        let reloaded = EventStore::load(storage).unwrap();
        assert_eq!(reloaded.events_for("home"), vec![created]);
        assert!(reloaded.events_for("bris").is_empty());
    }

    #[test]
    fn test_create_rejects_inverted_window() {
        let (storage, mut store) = make_store();
        let result = store.create(
            "home",
            draft("2025-03-20T11:00:00Z", "2025-03-20T10:00:00Z"),
            Origin::External,
            ts("2025-03-19T00:00:00Z"),
        );
        assert!(matches!(result, Err(ModesError::Validation(_))));
        assert!(store.all().is_empty());
        assert!(storage.keys().is_empty());
    }

    #[test]
    fn test_update_must_keep_valid_window() {
        let (_, mut store) = make_store();
        let event = store
            .create(
                "home",
                draft("2025-03-20T10:00:00Z", "2025-03-20T11:00:00Z"),
                Origin::External,
                ts("2025-03-19T00:00:00Z"),
            )
            .unwrap();

        let patch = EventPatch {
            end: Some(ts("2025-03-20T09:00:00Z")),
            ..Default::default()
        };
        let result = store.update(&event.uid, "home", &patch, Origin::External);
        assert!(matches!(result, Err(ModesError::Validation(_))));
        assert_eq!(store.get(&event.uid, "home"), Some(&event));
    }

    #[test]
    fn test_update_and_delete_require_matching_partition() {
        let (_, mut store) = make_store();
        let event = store
            .create(
                "home",
                draft("2025-03-20T10:00:00Z", "2025-03-20T11:00:00Z"),
                Origin::External,
                ts("2025-03-19T00:00:00Z"),
            )
            .unwrap();

        assert!(matches!(
            store.delete(&event.uid, "guest_room", Origin::External),
            Err(ModesError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("", "home", Origin::External),
            Err(ModesError::Validation(_))
        ));
        assert!(store.delete(&event.uid, "home", Origin::External).is_ok());
        assert!(store.all().is_empty());
    }

    #[test]
    fn test_failed_write_keeps_previous_collection() {
        let (storage, mut store) = make_store();
        let event = store
            .create(
                "home",
                draft("2025-03-20T10:00:00Z", "2025-03-20T11:00:00Z"),
                Origin::External,
                ts("2025-03-19T00:00:00Z"),
            )
            .unwrap();

        storage.set_fail_writes(true);
        let result = store.delete(&event.uid, "home", Origin::External);
        assert!(matches!(result, Err(ModesError::Persistence(_))));
        assert_eq!(store.all(), std::slice::from_ref(&event));
    }

    #[test]
    fn test_linked_events_are_guarded() {
        let (_, mut store) = make_store();
        let linked = draft("2025-03-20T10:00:00Z", "2025-03-20T11:00:00Z")
            .with_extra(LINKED_FROM_KEY, json!(true))
            .with_extra(LINK_SOURCE_UID_KEY, json!("source-1"));

        // Outsiders cannot write link metadata
        assert!(matches!(
            store.create(
                "no_tachnun",
                linked.clone(),
                Origin::External,
                ts("2025-03-19T00:00:00Z")
            ),
            Err(ModesError::Policy(_))
        ));

        let event = store
            .create("no_tachnun", linked, Origin::Link, ts("2025-03-19T00:00:00Z"))
            .unwrap();

        let patch = EventPatch {
            summary: Some("Edited".into()),
            ..Default::default()
        };
        assert!(matches!(
            store.update(&event.uid, "no_tachnun", &patch, Origin::External),
            Err(ModesError::Policy(_))
        ));
        assert!(matches!(
            store.delete(&event.uid, "no_tachnun", Origin::External),
            Err(ModesError::Policy(_))
        ));
        assert_eq!(store.get(&event.uid, "no_tachnun"), Some(&event));
        assert_eq!(store.find_linked("no_tachnun", "source-1"), Some(&event));

        assert!(store.delete(&event.uid, "no_tachnun", Origin::Link).is_ok());
    }

    #[test]
    fn test_query_uses_inclusive_overlap() {
        let (_, mut store) = make_store();
        let created = ts("2025-03-01T00:00:00Z");
        let before = store
            .create(
                "home",
                draft("2025-03-20T08:00:00Z", "2025-03-20T10:00:00Z"),
                Origin::External,
                created,
            )
            .unwrap();
        let after = store
            .create(
                "home",
                draft("2025-03-20T12:00:00Z", "2025-03-20T13:00:00Z"),
                Origin::External,
                created,
            )
            .unwrap();
        store
            .create(
                "home",
                draft("2025-03-20T13:00:01Z", "2025-03-20T14:00:00Z"),
                Origin::External,
                created,
            )
            .unwrap();
        store
            .create(
                "bris",
                draft("2025-03-20T10:30:00Z", "2025-03-20T11:00:00Z"),
                Origin::External,
                created,
            )
            .unwrap();

        let window =
            TimeWindow::new(ts("2025-03-20T10:00:00Z"), ts("2025-03-20T12:00:00Z")).unwrap();
        let found = store.query("home", &window);
        assert_eq!(found, vec![before, after]);
    }

    #[test]
    fn test_load_drops_invalid_and_duplicate_records() {
        let storage = Arc::new(MemoryStorage::new());
        let good = json!({
            "uid": "a", "mode_key": "home",
            "start": "2025-03-20T10:00:00Z", "end": "2025-03-20T11:00:00Z",
            "summary": "ok", "created": "2025-03-19T00:00:00Z"
        });
        let inverted = json!({
            "uid": "b", "mode_key": "home",
            "start": "2025-03-20T11:00:00Z", "end": "2025-03-20T10:00:00Z",
            "summary": "bad", "created": "2025-03-19T00:00:00Z"
        });
        storage
            .save(EVENTS_KEY, &json!({ "events": [good.clone(), inverted, good] }))
            .unwrap();

        let store = EventStore::load(storage).unwrap();
        assert_eq!(store.all().len(), 1);
        assert_eq!(store.all()[0].uid, "a");
        assert!(store.all()[0].extra.is_empty());
    }

    #[test]
    fn test_notifications_wait_for_publish() {
        let (_, mut store) = make_store();
        let seen: Arc<Mutex<Vec<(String, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store.subscribe(Box::new(move |change| {
            sink.lock()
                .unwrap()
                .push((change.mode_key.clone(), change.events.len()));
        }));

        let start = ts("2025-03-20T10:00:00Z");
        let created = ts("2025-03-19T00:00:00Z");
        for offset in 0..2 {
            let s = start + Duration::hours(offset);
            store
                .create(
                    "home",
                    NewEvent::new(s, s + Duration::minutes(30), ""),
                    Origin::External,
                    created,
                )
                .unwrap();
        }
        store
            .create(
                "bris",
                NewEvent::new(start, start + Duration::hours(1), "Bris"),
                Origin::External,
                created,
            )
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());

        store.publish_pending();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("home".to_string(), 2), ("bris".to_string(), 1)]
        );

        store.publish_pending();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
