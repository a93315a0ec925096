//! Mode switch state machine.
//!
//! States are OFF, ON-INDEFINITE and ON-TIMED(expire_at). Every operation is
//! planned first: `plan_*` returns the record to persist plus what to do with
//! the mode's timer, and [`ModeSwitch::commit`] applies a record once the
//! write succeeded. A failed write therefore never changes the switch.

use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;

/// Provenance of the most recent transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlledBy {
    #[default]
    Manual,
    Calendar,
    Timer,
    AutoReset,
    Restore,
}

impl fmt::Display for ControlledBy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            ControlledBy::Manual => "manual",
            ControlledBy::Calendar => "calendar",
            ControlledBy::Timer => "timer",
            ControlledBy::AutoReset => "auto_reset",
            ControlledBy::Restore => "restore",
        };
        write!(f, "{}", label)
    }
}

/// Persisted switch state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchRecord {
    pub is_on: bool,
    pub expire_at: Option<Timestamp>,
    #[serde(default)]
    pub controlled_by: ControlledBy,
}

impl SwitchRecord {
    fn off(cause: ControlledBy) -> Self {
        SwitchRecord {
            is_on: false,
            expire_at: None,
            controlled_by: cause,
        }
    }

    fn on(expire_at: Option<Timestamp>, cause: ControlledBy) -> Self {
        SwitchRecord {
            is_on: true,
            expire_at,
            controlled_by: cause,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPhase {
    Off,
    OnIndefinite,
    OnTimed(Timestamp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Keep,
    Cancel,
    Arm(Timestamp),
}

/// A planned transition: the record to persist and the timer change that
/// goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchTransition {
    pub record: SwitchRecord,
    pub timer: TimerAction,
}

/// How a switch came back from its persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Off,
    Indefinite,
    /// Timer must be re-armed for this deadline.
    Timed(Timestamp),
    /// Was ON-TIMED but the deadline passed while stopped. The switch is
    /// OFF in memory and that record still has to be persisted.
    Expired,
}

/// Restored expirations with this little time left count as already passed.
const RESTORE_MIN_REMAINING_SECS: i64 = 1;

#[derive(Debug, Clone)]
pub struct ModeSwitch {
    default_minutes: u32,
    record: SwitchRecord,
    /// The ON intent found at restore, consumed by the post-start reassert.
    restored_on: Option<Option<Timestamp>>,
}

impl ModeSwitch {
    pub fn new(default_minutes: u32) -> Self {
        ModeSwitch {
            default_minutes,
            record: SwitchRecord::default(),
            restored_on: None,
        }
    }

    /// Rebuild from the persisted record.
    pub fn restore(
        default_minutes: u32,
        persisted: Option<SwitchRecord>,
        now: Timestamp,
    ) -> (Self, RestoreOutcome) {
        let mut switch = Self::new(default_minutes);
        let Some(record) = persisted else {
            return (switch, RestoreOutcome::Off);
        };

        if !record.is_on {
            switch.record = SwitchRecord::off(record.controlled_by);
            return (switch, RestoreOutcome::Off);
        }

        match record.expire_at {
            None => {
                switch.record = record;
                switch.restored_on = Some(None);
                (switch, RestoreOutcome::Indefinite)
            }
            Some(expire_at) if expire_at - now > Duration::seconds(RESTORE_MIN_REMAINING_SECS) => {
                switch.record = record;
                switch.restored_on = Some(Some(expire_at));
                (switch, RestoreOutcome::Timed(expire_at))
            }
            Some(_) => {
                switch.record = SwitchRecord::off(ControlledBy::Timer);
                (switch, RestoreOutcome::Expired)
            }
        }
    }

    pub fn record(&self) -> &SwitchRecord {
        &self.record
    }

    pub fn is_on(&self) -> bool {
        self.record.is_on
    }

    pub fn controlled_by(&self) -> ControlledBy {
        self.record.controlled_by
    }

    pub fn phase(&self) -> SwitchPhase {
        match (self.record.is_on, self.record.expire_at) {
            (false, _) => SwitchPhase::Off,
            (true, None) => SwitchPhase::OnIndefinite,
            (true, Some(at)) => SwitchPhase::OnTimed(at),
        }
    }

    /// Manual ON. `None` uses the configured default; `Some(0)` is indefinite.
    pub fn plan_turn_on(&self, minutes: Option<u32>, now: Timestamp) -> SwitchTransition {
        let minutes = minutes.unwrap_or(self.default_minutes);
        timed_on(minutes, now, ControlledBy::Manual)
    }

    pub fn plan_turn_off(&self, cause: ControlledBy) -> SwitchTransition {
        SwitchTransition {
            record: SwitchRecord::off(cause),
            timer: TimerAction::Cancel,
        }
    }

    /// Calendar control path: indefinite ON or OFF, no default duration.
    pub fn plan_calendar(&self, on: bool) -> SwitchTransition {
        if on {
            SwitchTransition {
                record: SwitchRecord::on(None, ControlledBy::Calendar),
                timer: TimerAction::Cancel,
            }
        } else {
            self.plan_turn_off(ControlledBy::Calendar)
        }
    }

    /// Expiry. `None` when the switch is no longer ON-TIMED.
    pub fn plan_timer_fire(&self) -> Option<SwitchTransition> {
        match self.phase() {
            SwitchPhase::OnTimed(_) => Some(SwitchTransition {
                record: SwitchRecord::off(ControlledBy::Timer),
                timer: TimerAction::Keep,
            }),
            _ => None,
        }
    }

    pub fn plan_auto_reset(&self) -> Option<SwitchTransition> {
        self.is_on()
            .then(|| self.plan_turn_off(ControlledBy::AutoReset))
    }

    /// Post-start reassert. `None` unless ON was restored and the switch has
    /// since gone OFF. Uses the expiration found at restore, not the current one.
    pub fn plan_reassert(&self, now: Timestamp) -> Option<SwitchTransition> {
        let restored = self.restored_on?;
        if self.is_on() {
            return None;
        }

        let transition = match restored {
            Some(expire_at) if expire_at - now > Duration::seconds(RESTORE_MIN_REMAINING_SECS) => {
                SwitchTransition {
                    record: SwitchRecord::on(Some(expire_at), ControlledBy::Restore),
                    timer: TimerAction::Arm(expire_at),
                }
            }
            _ => SwitchTransition {
                record: SwitchRecord::on(None, ControlledBy::Restore),
                timer: TimerAction::Cancel,
            },
        };
        Some(transition)
    }

    /// Drop the restored intent; the reassert runs at most once.
    pub fn clear_restored_intent(&mut self) {
        self.restored_on = None;
    }

    pub fn has_restored_intent(&self) -> bool {
        self.restored_on.is_some()
    }

    /// Apply a record that has been persisted.
    pub fn commit(&mut self, record: SwitchRecord) {
        self.record = record;
    }
}

fn timed_on(minutes: u32, now: Timestamp, cause: ControlledBy) -> SwitchTransition {
    if minutes == 0 {
        return SwitchTransition {
            record: SwitchRecord::on(None, cause),
            timer: TimerAction::Cancel,
        };
    }
    let expire_at = now + Duration::minutes(i64::from(minutes));
    SwitchTransition {
        record: SwitchRecord::on(Some(expire_at), cause),
        timer: TimerAction::Arm(expire_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn ts(s: &str) -> Timestamp {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn now() -> Timestamp {
        ts("2025-03-20T10:00:00-04:00")
    }

    fn apply(switch: &mut ModeSwitch, transition: &SwitchTransition) {
        switch.commit(transition.record.clone());
    }

    #[test]
    fn test_turn_on_minutes() {
        let switch = ModeSwitch::new(0);

        let timed = switch.plan_turn_on(Some(10), now());
        assert_eq!(timed.record.expire_at, Some(now() + Duration::minutes(10)));
        assert_eq!(timed.timer, TimerAction::Arm(now() + Duration::minutes(10)));
        assert_eq!(timed.record.controlled_by, ControlledBy::Manual);

        let indefinite = switch.plan_turn_on(Some(0), now());
        assert!(indefinite.record.is_on);
        assert_eq!(indefinite.record.expire_at, None);
        assert_eq!(indefinite.timer, TimerAction::Cancel);
    }

    #[test]
    fn test_turn_on_uses_default_minutes() {
        let switch = ModeSwitch::new(90);
        let transition = switch.plan_turn_on(None, now());
        assert_eq!(transition.record.expire_at, Some(now() + Duration::minutes(90)));

        // Calendar path ignores the default
        let calendar = switch.plan_calendar(true);
        assert_eq!(calendar.record.expire_at, None);
        assert_eq!(calendar.record.controlled_by, ControlledBy::Calendar);
    }

    #[test]
    fn test_timer_fire_only_from_timed() {
        let mut switch = ModeSwitch::new(0);
        assert!(switch.plan_timer_fire().is_none());

        let planned = switch.plan_turn_on(Some(10), now());
        apply(&mut switch, &planned);
        let fire = switch.plan_timer_fire().unwrap();
        assert_eq!(fire.record, SwitchRecord::off(ControlledBy::Timer));
        apply(&mut switch, &fire);

        assert_eq!(switch.phase(), SwitchPhase::Off);
        assert!(switch.plan_timer_fire().is_none());

        let planned = switch.plan_turn_on(Some(0), now());
        apply(&mut switch, &planned);
        assert!(switch.plan_timer_fire().is_none());
    }

    #[test]
    fn test_auto_reset_only_when_on() {
        let mut switch = ModeSwitch::new(0);
        assert!(switch.plan_auto_reset().is_none());
        let planned = switch.plan_turn_on(Some(0), now());
        apply(&mut switch, &planned);
        let reset = switch.plan_auto_reset().unwrap();
        assert_eq!(reset.record.controlled_by, ControlledBy::AutoReset);
        assert!(!reset.record.is_on);
    }

    #[test]
    fn test_restore_outcomes() {
        let persisted = |is_on, expire_at| {
            Some(SwitchRecord {
                is_on,
                expire_at,
                controlled_by: ControlledBy::Manual,
            })
        };

        let (_, outcome) = ModeSwitch::restore(0, None, now());
        assert_eq!(outcome, RestoreOutcome::Off);

        let (switch, outcome) = ModeSwitch::restore(0, persisted(false, None), now());
        assert_eq!(outcome, RestoreOutcome::Off);
        assert!(!switch.has_restored_intent());

        let (switch, outcome) = ModeSwitch::restore(0, persisted(true, None), now());
        assert_eq!(outcome, RestoreOutcome::Indefinite);
        assert_eq!(switch.phase(), SwitchPhase::OnIndefinite);

        let ahead = now() + Duration::minutes(5);
        let (switch, outcome) = ModeSwitch::restore(0, persisted(true, Some(ahead)), now());
        assert_eq!(outcome, RestoreOutcome::Timed(ahead));
        assert_eq!(switch.phase(), SwitchPhase::OnTimed(ahead));

        let behind = now() - Duration::minutes(5);
        let (switch, outcome) = ModeSwitch::restore(0, persisted(true, Some(behind)), now());
        assert_eq!(outcome, RestoreOutcome::Expired);
        assert!(!switch.has_restored_intent());
        assert_eq!(switch.record(), &SwitchRecord::off(ControlledBy::Timer));

        // Less than a second left counts as expired
        let nearly = now() + Duration::milliseconds(500);
        let (_, outcome) = ModeSwitch::restore(0, persisted(true, Some(nearly)), now());
        assert_eq!(outcome, RestoreOutcome::Expired);
    }

    #[test]
    fn test_reassert_uses_restored_expiration() {
        let ahead = now() + Duration::minutes(5);
        let (mut switch, _) = ModeSwitch::restore(
            0,
            Some(SwitchRecord::on(Some(ahead), ControlledBy::Manual)),
            now(),
        );

        // Still ON: nothing to do
        assert!(switch.plan_reassert(now()).is_none());

        let planned = switch.plan_turn_off(ControlledBy::Manual);
        apply(&mut switch, &planned);
        let reassert = switch.plan_reassert(now() + Duration::minutes(1)).unwrap();
        assert_eq!(reassert.record, SwitchRecord::on(Some(ahead), ControlledBy::Restore));
        assert_eq!(reassert.timer, TimerAction::Arm(ahead));

        // Past the restored expiration the reassert falls back to indefinite
        let late = switch.plan_reassert(now() + Duration::minutes(10)).unwrap();
        assert_eq!(late.record, SwitchRecord::on(None, ControlledBy::Restore));

        switch.clear_restored_intent();
        assert!(switch.plan_reassert(now()).is_none());
    }

    #[test]
    fn test_record_layout() {
        let record =
            SwitchRecord::on(Some(ts("2025-03-20T10:10:00-04:00")), ControlledBy::AutoReset);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["is_on"], serde_json::json!(true));
        assert_eq!(json["expire_at"], serde_json::json!("2025-03-20T10:10:00-04:00"));
        assert_eq!(json["controlled_by"], serde_json::json!("auto_reset"));
    }
}
