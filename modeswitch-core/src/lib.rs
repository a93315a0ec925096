//! Core engine for modeswitch.
//!
//! Reconciles manual commands, expiring timers and calendar event windows
//! into one persisted on/off state per mode:
//! - `event_store` and `link` for calendar events and the Bris → No Tachnun link
//! - `switch`, `override_switch` and `timers` for per-mode state
//! - `engine` and `runtime` for reconciliation and the background tasks

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod event_store;
pub mod ledger;
pub mod link;
pub mod mode;
pub mod override_switch;
pub mod reconcile;
pub mod runtime;
pub mod status;
pub mod storage;
pub mod switch;
pub mod timers;
pub mod window;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use crate::config::{ModesConfig, Settings};
pub use engine::{ModesEngine, SharedEngine, lock_engine};
pub use error::{ModesError, ModesResult};
pub use event::{CalendarEvent, EventPatch, NewEvent};
pub use runtime::ModesRuntime;
pub use switch::ControlledBy;
