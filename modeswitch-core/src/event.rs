//! Calendar event types.
//!
//! Events are partitioned by mode key. Each event is a half-open window
//! `[start, end)` plus an opaque `extra` bag, which also carries the link
//! metadata written by the cross-mode link.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Timestamp;
use crate::error::{ModesError, ModesResult};

pub type Extra = serde_json::Map<String, Value>;

/// Marks an event as derived by the cross-mode link.
pub const LINKED_FROM_KEY: &str = "linked_from_bris";

/// Uid of the source event a linked event was derived from.
pub const LINK_SOURCE_UID_KEY: &str = "bris_event_uid";

pub const DESCRIPTION_KEY: &str = "description";

pub const DEFAULT_SUMMARY: &str = "Event";

/// A stored calendar event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub uid: String,
    pub mode_key: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub summary: String,
    pub created: Timestamp,
    #[serde(default)]
    pub extra: Extra,
}

impl CalendarEvent {
    pub fn new(mode_key: &str, draft: NewEvent, created: Timestamp) -> Self {
        CalendarEvent {
            uid: uuid::Uuid::new_v4().to_string(),
            mode_key: mode_key.to_string(),
            start: draft.start,
            end: draft.end,
            summary: draft.summary,
            created,
            extra: draft.extra,
        }
    }

    pub fn is_linked(&self) -> bool {
        self.extra
            .get(LINKED_FROM_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn link_source_uid(&self) -> Option<&str> {
        self.extra.get(LINK_SOURCE_UID_KEY).and_then(Value::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.extra.get(DESCRIPTION_KEY).and_then(Value::as_str)
    }

    /// Whether `at` falls inside `[start, end)`.
    pub fn contains(&self, at: Timestamp) -> bool {
        self.start <= at && at < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn to_summary(&self) -> EventSummary {
        EventSummary {
            uid: self.uid.clone(),
            summary: self.summary.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

/// Read-only view of an event window, used by projections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub uid: String,
    pub summary: String,
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Fields for a new event.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub start: Timestamp,
    pub end: Timestamp,
    pub summary: String,
    pub extra: Extra,
}

impl NewEvent {
    pub fn new(start: Timestamp, end: Timestamp, summary: &str) -> Self {
        NewEvent {
            start,
            end,
            summary: normalize_summary(summary),
            extra: Extra::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.extra
            .insert(DESCRIPTION_KEY.to_string(), Value::String(description.to_string()));
        self
    }

    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

/// Partial update. `None` leaves a field alone; an `extra` entry set to
/// `Value::Null` removes that key; extra keys not mentioned are untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPatch {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub summary: Option<String>,
    pub extra: Extra,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.start.is_none()
            && self.end.is_none()
            && self.summary.is_none()
            && self.extra.is_empty()
    }

    pub fn set_description(&mut self, description: Option<&str>) {
        let value = description
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null);
        self.extra.insert(DESCRIPTION_KEY.to_string(), value);
    }

    /// Apply onto a copy of `event`. The result is not validated.
    pub fn applied_to(&self, event: &CalendarEvent) -> CalendarEvent {
        let mut next = event.clone();
        if let Some(start) = self.start {
            next.start = start;
        }
        if let Some(end) = self.end {
            next.end = end;
        }
        if let Some(summary) = &self.summary {
            next.summary = normalize_summary(summary);
        }
        for (key, value) in &self.extra {
            if value.is_null() {
                next.extra.remove(key);
            } else {
                next.extra.insert(key.clone(), value.clone());
            }
        }
        next
    }
}

/// True when `extra` names a key reserved for the cross-mode link.
pub fn touches_link_keys(extra: &Extra) -> bool {
    extra.contains_key(LINKED_FROM_KEY) || extra.contains_key(LINK_SOURCE_UID_KEY)
}

/// Enforce `end > start`.
pub fn validate_window(start: Timestamp, end: Timestamp) -> ModesResult<()> {
    if end <= start {
        return Err(ModesError::Validation(format!(
            "event end {} must be after start {}",
            end.to_rfc3339(),
            start.to_rfc3339()
        )));
    }
    Ok(())
}

pub fn normalize_summary(summary: &str) -> String {
    let trimmed = summary.trim();
    if trimmed.is_empty() {
        DEFAULT_SUMMARY.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse an event endpoint.
///
/// Accepts RFC 3339 (`2025-03-20T15:00:00-04:00`), naive local date-times
/// (`2025-03-20T15:00`, `2025-03-20 15:00:00`) interpreted in `tz`, and bare
/// dates. A bare date is midnight for a start and the following midnight for
/// an end, so a single date covers the whole day.
pub fn parse_endpoint(input: &str, tz: Tz, is_end: bool) -> ModesResult<Timestamp> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ModesError::Validation("missing event start/end".into()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt);
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return localize(naive, tz);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let day = if is_end { date + Duration::days(1) } else { date };
        let midnight = day
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| ModesError::Validation(format!("invalid date '{}'", s)))?;
        return localize(midnight, tz);
    }

    Err(ModesError::Validation(format!(
        "cannot parse '{}' as a date or date-time",
        s
    )))
}

fn localize(naive: NaiveDateTime, tz: Tz) -> ModesResult<Timestamp> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
        .ok_or_else(|| ModesError::Validation(format!("{} does not exist in {}", naive, tz)))
}
