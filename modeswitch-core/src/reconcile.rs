//! Per-mode reconciliation: active/next event selection and the tick
//! decision table.
//!
//! The functions here are pure. The engine feeds them the current event
//! partition, override and switch state, then carries out the decision.

use serde::Serialize;

use crate::clock::Timestamp;
use crate::event::{CalendarEvent, EventSummary};

/// The event whose `[start, end)` contains `now`. Ties go to the earliest
/// start, then to store order.
pub fn find_active(events: &[CalendarEvent], now: Timestamp) -> Option<&CalendarEvent> {
    events
        .iter()
        .filter(|e| e.contains(now))
        .min_by_key(|e| e.start)
}

/// The soonest event starting strictly after `now`, ties by store order.
pub fn find_next(events: &[CalendarEvent], now: Timestamp) -> Option<&CalendarEvent> {
    events
        .iter()
        .filter(|e| e.start > now)
        .min_by_key(|e| e.start)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Override engaged: the calendar does not command the switch.
    Suppressed,
    TurnOn,
    TurnOff,
    NoOp,
}

pub fn decide(override_on: bool, active: bool, switch_on: bool) -> TickDecision {
    if override_on {
        return TickDecision::Suppressed;
    }
    match (active, switch_on) {
        (true, false) => TickDecision::TurnOn,
        (false, true) => TickDecision::TurnOff,
        _ => TickDecision::NoOp,
    }
}

/// Read-only views recomputed on every tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Projections {
    pub next: Option<EventSummary>,
    pub active: Option<EventSummary>,
    pub computed_at: Option<Timestamp>,
}

impl Projections {
    pub fn compute(events: &[CalendarEvent], now: Timestamp) -> Self {
        Projections {
            next: find_next(events, now).map(CalendarEvent::to_summary),
            active: find_active(events, now).map(CalendarEvent::to_summary),
            computed_at: Some(now),
        }
    }

    /// The active event, else the next one.
    pub fn current(&self) -> Option<&EventSummary> {
        self.active.as_ref().or(self.next.as_ref())
    }
}

/// Tick-to-tick memory of one mode.
#[derive(Debug, Clone, Default)]
pub struct ReconcileUnit {
    pub projections: Projections,
    /// The link target was turned on by this unit and not yet released.
    pub forced_target: bool,
    /// When an active event was last observed to end.
    pub last_ended: Option<Timestamp>,
}

impl ReconcileUnit {
    /// Store fresh projections, noting when an active event went away.
    pub fn observe(&mut self, projections: Projections, now: Timestamp) {
        if self.projections.active.is_some() && projections.active.is_none() {
            self.last_ended = Some(now);
        }
        self.projections = projections;
    }
}
