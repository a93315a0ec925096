//! Calendar override gate.
//!
//! While engaged, the reconciliation tick leaves the mode's switch alone.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub is_on: bool,
}

#[derive(Debug, Clone)]
pub struct CalendarOverride {
    record: OverrideRecord,
}

impl CalendarOverride {
    /// Rebuild from the persisted record. A missing record is disengaged.
    pub fn restore(persisted: Option<OverrideRecord>) -> Self {
        CalendarOverride {
            record: persisted.unwrap_or_default(),
        }
    }

    pub fn is_on(&self) -> bool {
        self.record.is_on
    }

    /// Apply a record that has been persisted.
    pub fn commit(&mut self, record: OverrideRecord) {
        self.record = record;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_record_is_disengaged() {
        let gate = CalendarOverride::restore(None);
        assert!(!gate.is_on());
    }

    #[test]
    fn test_record_round_trips_as_flag() {
        let json = serde_json::to_value(OverrideRecord { is_on: true }).unwrap();
        assert_eq!(json, serde_json::json!({ "is_on": true }));

        let mut gate = CalendarOverride::restore(serde_json::from_value(json).ok());
        assert!(gate.is_on());
        gate.commit(OverrideRecord { is_on: false });
        assert!(!gate.is_on());
    }
}
