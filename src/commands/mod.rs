pub mod event;
pub mod ledger;
pub mod modes;
pub mod run;
pub mod status;
pub mod switch;

use std::sync::Arc;

use anyhow::{Context, Result};
use modeswitch_core::clock::SystemClock;
use modeswitch_core::config::Settings;
use modeswitch_core::engine::ModesEngine;
use modeswitch_core::storage::FileStorage;

use crate::singleton::{self, LockGuard};

/// An engine opened from the persisted state, plus the lock that makes this
/// process its only writer.
pub struct Session {
    pub engine: ModesEngine,
    _lock: LockGuard,
}

pub fn open_session(settings: &Settings) -> Result<Session> {
    let lock = singleton::acquire_lock(&settings.data_dir)?;

    let engine = ModesEngine::open(
        settings.clone(),
        Arc::new(SystemClock::new(settings.time_zone)),
        Arc::new(FileStorage::new(settings.data_dir.clone())),
    )
    .context("Could not open mode state")?;

    Ok(Session {
        engine,
        _lock: lock,
    })
}
