//! Cross-mode link: mirrors one mode's events into another mode's partition.
//!
//! Only the Bris → No Tachnun pair exists. Derived events carry
//! `linked_from_bris` and the source uid in `extra`, and the event store
//! refuses to let anything but the link touch them.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::Timestamp;
use crate::error::ModesResult;
use crate::event::{CalendarEvent, EventPatch, LINK_SOURCE_UID_KEY, LINKED_FROM_KEY, NewEvent};
use crate::event_store::{EventStore, Origin};
use crate::mode::{LINK_SOURCE_MODE, LINK_TARGET_MODE, mode_friendly};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeLink {
    pub source: &'static str,
    pub target: &'static str,
    pub enabled: bool,
}

impl ModeLink {
    pub fn bris_no_tachnun(enabled: bool) -> Self {
        ModeLink {
            source: LINK_SOURCE_MODE,
            target: LINK_TARGET_MODE,
            enabled,
        }
    }

    /// Whether events of `mode_key` propagate through this link.
    pub fn applies_to(&self, mode_key: &str) -> bool {
        self.enabled && mode_key == self.source
    }

    pub fn linked_summary(&self, source_summary: &str) -> String {
        format!("{}: {}", mode_friendly(self.source), source_summary)
    }

    /// Create the derived event for a new source event.
    /// Returns `None` when a derived event already exists for this source.
    pub fn on_source_created(
        &self,
        store: &mut EventStore,
        source: &CalendarEvent,
        now: Timestamp,
    ) -> ModesResult<Option<CalendarEvent>> {
        if let Some(existing) = store.find_linked(self.target, &source.uid) {
            debug!(uid = %existing.uid, source_uid = %source.uid, "Linked event already exists");
            return Ok(None);
        }

        let draft = NewEvent::new(source.start, source.end, &self.linked_summary(&source.summary))
            .with_extra(LINKED_FROM_KEY, Value::Bool(true))
            .with_extra(LINK_SOURCE_UID_KEY, Value::String(source.uid.clone()));

        let linked = store.create(self.target, draft, Origin::Link, now)?;
        info!(
            mode = %self.target,
            uid = %linked.uid,
            source_uid = %source.uid,
            "Created linked event"
        );
        Ok(Some(linked))
    }

    /// Mirror the source window and summary onto its derived event.
    /// A missing derived event is logged and left missing.
    pub fn on_source_updated(
        &self,
        store: &mut EventStore,
        source: &CalendarEvent,
    ) -> ModesResult<Option<CalendarEvent>> {
        let Some(linked_uid) = store
            .find_linked(self.target, &source.uid)
            .map(|e| e.uid.clone())
        else {
            warn!(
                mode = %self.target,
                source_uid = %source.uid,
                "No linked event to update"
            );
            return Ok(None);
        };

        let patch = EventPatch {
            start: Some(source.start),
            end: Some(source.end),
            summary: Some(self.linked_summary(&source.summary)),
            ..Default::default()
        };
        let linked = store.update(&linked_uid, self.target, &patch, Origin::Link)?;
        info!(
            mode = %self.target,
            uid = %linked_uid,
            source_uid = %source.uid,
            "Updated linked event"
        );
        Ok(Some(linked))
    }

    /// Remove the derived event of a deleted source, if there is one.
    pub fn on_source_deleted(
        &self,
        store: &mut EventStore,
        source_uid: &str,
    ) -> ModesResult<Option<CalendarEvent>> {
        let Some(linked_uid) = store
            .find_linked(self.target, source_uid)
            .map(|e| e.uid.clone())
        else {
            debug!(source_uid = %source_uid, "No linked event to delete");
            return Ok(None);
        };

        let removed = store.delete(&linked_uid, self.target, Origin::Link)?;
        info!(
            mode = %self.target,
            uid = %linked_uid,
            source_uid = %source_uid,
            "Deleted linked event"
        );
        Ok(Some(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::DateTime;
    use std::sync::Arc;

    fn ts(s: &str) -> Timestamp {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn make_source(store: &mut EventStore) -> CalendarEvent {
        store
            .create(
                LINK_SOURCE_MODE,
                NewEvent::new(ts("2025-03-20T09:00:00Z"), ts("2025-03-20T12:00:00Z"), "Cohen baby"),
                Origin::External,
                ts("2025-03-19T00:00:00Z"),
            )
            .unwrap()
    }

    #[test]
    fn test_create_mirrors_window_and_tags_source() {
        let mut store = EventStore::load(Arc::new(MemoryStorage::new())).unwrap();
        let link = ModeLink::bris_no_tachnun(true);
        let source = make_source(&mut store);

        let linked = link
            .on_source_created(&mut store, &source, ts("2025-03-19T00:00:00Z"))
            .unwrap()
            .unwrap();
        assert_eq!(linked.mode_key, LINK_TARGET_MODE);
        assert_eq!((linked.start, linked.end), (source.start, source.end));
        assert_eq!(linked.summary, "Bris: Cohen baby");
        assert!(linked.is_linked());
        assert_eq!(linked.link_source_uid(), Some(source.uid.as_str()));

        // A second create for the same source is a no-op
        assert!(
            link.on_source_created(&mut store, &source, ts("2025-03-19T00:00:00Z"))
                .unwrap()
                .is_none()
        );
        assert_eq!(store.events_for(LINK_TARGET_MODE).len(), 1);
    }

    #[test]
    fn test_update_mirrors_and_never_recreates() {
        let mut store = EventStore::load(Arc::new(MemoryStorage::new())).unwrap();
        let link = ModeLink::bris_no_tachnun(true);
        let source = make_source(&mut store);

        // Nothing linked yet
        assert!(link.on_source_updated(&mut store, &source).unwrap().is_none());
        assert!(store.events_for(LINK_TARGET_MODE).is_empty());

        link.on_source_created(&mut store, &source, ts("2025-03-19T00:00:00Z"))
            .unwrap();
        let patch = EventPatch {
            end: Some(ts("2025-03-20T13:00:00Z")),
            summary: Some("Levi baby".into()),
            ..Default::default()
        };
        let moved = store
            .update(&source.uid, LINK_SOURCE_MODE, &patch, Origin::External)
            .unwrap();

        let linked = link.on_source_updated(&mut store, &moved).unwrap().unwrap();
        assert_eq!(linked.end, ts("2025-03-20T13:00:00Z"));
        assert_eq!(linked.summary, "Bris: Levi baby");
    }

    #[test]
    fn test_delete_removes_only_the_linked_event() {
        let mut store = EventStore::load(Arc::new(MemoryStorage::new())).unwrap();
        let link = ModeLink::bris_no_tachnun(true);
        let first = make_source(&mut store);
        let second = make_source(&mut store);
        link.on_source_created(&mut store, &first, ts("2025-03-19T00:00:00Z"))
            .unwrap();
        link.on_source_created(&mut store, &second, ts("2025-03-19T00:00:00Z"))
            .unwrap();

        let removed = link.on_source_deleted(&mut store, &first.uid).unwrap().unwrap();
        assert_eq!(removed.link_source_uid(), Some(first.uid.as_str()));

        let remaining = store.events_for(LINK_TARGET_MODE);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].link_source_uid(), Some(second.uid.as_str()));

        assert!(link.on_source_deleted(&mut store, &first.uid).unwrap().is_none());
    }

    #[test]
    fn test_applies_only_when_enabled_for_source() {
        assert!(ModeLink::bris_no_tachnun(true).applies_to("bris"));
        assert!(!ModeLink::bris_no_tachnun(true).applies_to("no_tachnun"));
        assert!(!ModeLink::bris_no_tachnun(false).applies_to("bris"));
    }
}
