//! Read-only status views over the engine.

use serde::Serialize;

use crate::clock::Timestamp;
use crate::event::EventSummary;
use crate::mode::ModeGroup;
use crate::switch::ControlledBy;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeStatus {
    pub key: String,
    pub name: String,
    pub group: ModeGroup,
    pub is_on: bool,
    pub controlled_by: ControlledBy,
    pub expire_at: Option<Timestamp>,
    pub override_on: bool,
    pub active: Option<EventSummary>,
    pub next: Option<EventSummary>,
    /// A calendar event is running, whether or not the override lets it act.
    pub event_active: bool,
    pub last_ended: Option<Timestamp>,
}

impl ModeStatus {
    /// The active event, else the next one.
    pub fn current_event(&self) -> Option<&EventSummary> {
        self.active.as_ref().or(self.next.as_ref())
    }
}

/// Event-group modes that are currently ON.
pub fn event_modes_on(statuses: &[ModeStatus]) -> Vec<&ModeStatus> {
    statuses
        .iter()
        .filter(|s| s.group == ModeGroup::Event && s.is_on)
        .collect()
}

/// Modes that are ON while their calendar override is engaged.
pub fn modes_running_with_override(statuses: &[ModeStatus]) -> Vec<&ModeStatus> {
    statuses
        .iter()
        .filter(|s| s.is_on && s.override_on)
        .collect()
}
