//! The reconciliation engine.
//!
//! One owned value holds every enabled mode's switch, override gate and
//! tick memory, plus the event store and the timer arena. Callers share it
//! as [`SharedEngine`] and every mutation runs to completion under that lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, Timestamp};
use crate::config::Settings;
use crate::error::{ModesError, ModesResult};
use crate::event::{CalendarEvent, EventPatch, NewEvent};
use crate::event_store::{EventStore, Origin, Subscriber};
use crate::ledger::{EventLedger, LedgerSnapshot};
use crate::link::ModeLink;
use crate::mode::{find_mode, mode_friendly};
use crate::override_switch::{CalendarOverride, OverrideRecord};
use crate::reconcile::{Projections, ReconcileUnit, TickDecision, decide};
use crate::status::ModeStatus;
use crate::storage::{Storage, load_record, override_key, save_record, switch_key};
use crate::switch::{
    ControlledBy, ModeSwitch, RestoreOutcome, SwitchRecord, SwitchTransition, TimerAction,
};
use crate::timers::TimerArena;
use crate::window::TimeWindow;

pub type SharedEngine = Arc<Mutex<ModesEngine>>;

/// Lock the engine, recovering from a poisoned lock.
pub fn lock_engine(engine: &SharedEngine) -> MutexGuard<'_, ModesEngine> {
    engine.lock().unwrap_or_else(|poisoned| {
        warn!("Engine lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Everything the engine keeps for one enabled mode.
struct ModeUnit {
    switch: ModeSwitch,
    gate: CalendarOverride,
    reconcile: ReconcileUnit,
    /// Resolved once at startup for the link source.
    link_target: Option<&'static str>,
}

pub struct ModesEngine {
    settings: Settings,
    clock: Arc<dyn Clock>,
    storage: Arc<dyn Storage>,
    store: EventStore,
    units: HashMap<String, ModeUnit>,
    order: Vec<String>,
    timers: TimerArena,
    link: ModeLink,
    ledger: Arc<Mutex<EventLedger>>,
    started: bool,
}

impl ModesEngine {
    /// Load events and restore every enabled mode from storage.
    pub fn open(
        settings: Settings,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn Storage>,
    ) -> ModesResult<Self> {
        let mut store = EventStore::load(storage.clone())?;

        let ledger = Arc::new(Mutex::new(EventLedger::new()));
        {
            let mut guard = ledger.lock().unwrap_or_else(|p| p.into_inner());
            guard.seed(store.all());
        }
        let sink = ledger.clone();
        store.subscribe(Box::new(move |change| {
            sink.lock()
                .unwrap_or_else(|p| p.into_inner())
                .on_events_changed(change);
        }));

        let link = ModeLink::bris_no_tachnun(settings.link_enabled);
        let mut engine = ModesEngine {
            clock,
            storage,
            store,
            units: HashMap::new(),
            order: Vec::new(),
            timers: TimerArena::new(),
            link,
            ledger,
            started: false,
            settings,
        };

        for key in engine.settings.enabled_modes.clone() {
            engine.restore_mode(&key);
        }

        info!(
            modes = engine.order.len(),
            events = engine.store.all().len(),
            pending_timers = engine.timers.pending_count(),
            link = engine.link.enabled,
            "Engine opened"
        );
        Ok(engine)
    }

    pub fn into_shared(self) -> SharedEngine {
        Arc::new(Mutex::new(self))
    }

    fn restore_mode(&mut self, key: &str) {
        if find_mode(key).is_none() {
            warn!(mode = %key, "Skipping unknown mode");
            return;
        }
        let now = self.clock.now();

        let persisted: Option<SwitchRecord> = load_record(self.storage.as_ref(), &switch_key(key))
            .unwrap_or_else(|e| {
                warn!(mode = %key, error = %e, "Unreadable switch record, starting OFF");
                None
            });
        let (switch, outcome) =
            ModeSwitch::restore(self.settings.default_minutes(key), persisted, now);

        match outcome {
            RestoreOutcome::Timed(deadline) => {
                self.timers.arm(key, deadline, now);
            }
            RestoreOutcome::Expired => {
                let saved = save_record(self.storage.as_ref(), &switch_key(key), switch.record());
                if let Err(e) = saved {
                    error!(mode = %key, error = %e, "Failed to persist expired switch as OFF");
                }
            }
            RestoreOutcome::Off | RestoreOutcome::Indefinite => {}
        }

        let gate_record: Option<OverrideRecord> =
            load_record(self.storage.as_ref(), &override_key(key)).unwrap_or_else(|e| {
                warn!(mode = %key, error = %e, "Unreadable override record, starting disengaged");
                None
            });
        let gate = CalendarOverride::restore(gate_record);

        let link_target = self.link.applies_to(key).then_some(self.link.target);

        info!(
            mode = %key,
            outcome = ?outcome,
            override_on = gate.is_on(),
            "Restored mode"
        );

        self.units.insert(
            key.to_string(),
            ModeUnit {
                switch,
                gate,
                reconcile: ReconcileUnit::default(),
                link_target,
            },
        );
        self.order.push(key.to_string());
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Enabled mode keys in catalogue order.
    pub fn mode_keys(&self) -> &[String] {
        &self.order
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.units.contains_key(key)
    }

    pub fn switch_record(&self, key: &str) -> Option<&SwitchRecord> {
        self.units.get(key).map(|u| u.switch.record())
    }

    pub fn switch_is_on(&self, key: &str) -> Option<bool> {
        self.units.get(key).map(|u| u.switch.is_on())
    }

    pub fn override_is_on(&self, key: &str) -> Option<bool> {
        self.units.get(key).map(|u| u.gate.is_on())
    }

    fn unit(&self, key: &str) -> ModesResult<&ModeUnit> {
        self.units
            .get(key)
            .ok_or_else(|| ModesError::mode_not_enabled(key))
    }

    // ---- switch commands -------------------------------------------------

    /// Manual ON. `None` minutes uses the mode's default; `Some(0)` is indefinite.
    pub fn turn_on(&mut self, key: &str, minutes: Option<u32>) -> ModesResult<SwitchRecord> {
        let now = self.clock.now();
        let transition = self
            .unit(key)
            .inspect_err(|e| log_rejection("turn_on", key, e))?
            .switch
            .plan_turn_on(minutes, now);
        self.apply_switch(key, transition)
    }

    pub fn turn_off(&mut self, key: &str) -> ModesResult<SwitchRecord> {
        let transition = self
            .unit(key)
            .inspect_err(|e| log_rejection("turn_off", key, e))?
            .switch
            .plan_turn_off(ControlledBy::Manual);
        self.apply_switch(key, transition)
    }

    pub fn set_override(&mut self, key: &str, on: bool) -> ModesResult<()> {
        self.unit(key)
            .inspect_err(|e| log_rejection("set_override", key, e))?;

        let record = OverrideRecord { is_on: on };
        save_record(self.storage.as_ref(), &override_key(key), &record).inspect_err(|e| {
            error!(mode = %key, error = %e, "Failed to persist override");
        })?;

        if let Some(unit) = self.units.get_mut(key) {
            unit.gate.commit(record);
        }
        info!(mode = %key, override_on = on, "Override changed");
        Ok(())
    }

    /// Persist the planned record, then apply it and its timer change.
    fn apply_switch(
        &mut self,
        key: &str,
        transition: SwitchTransition,
    ) -> ModesResult<SwitchRecord> {
        let now = self.clock.now();
        let Some(unit) = self.units.get_mut(key) else {
            return Err(ModesError::mode_not_enabled(key));
        };

        save_record(self.storage.as_ref(), &switch_key(key), &transition.record).inspect_err(|e| {
            error!(mode = %key, error = %e, "Failed to persist switch state");
        })?;

        unit.switch.commit(transition.record.clone());
        match transition.timer {
            TimerAction::Keep => {}
            TimerAction::Cancel => {
                self.timers.cancel(key);
            }
            TimerAction::Arm(deadline) => {
                let effective = self.timers.arm(key, deadline, now);
                debug!(mode = %key, deadline = %effective, "Armed expiration timer");
            }
        }

        let record = transition.record;
        info!(
            mode = %key,
            is_on = record.is_on,
            controlled_by = %record.controlled_by,
            expire_at = ?record.expire_at,
            "Switch changed"
        );
        Ok(record)
    }

    // ---- events ----------------------------------------------------------

    /// Register an external "events changed" subscriber.
    pub fn subscribe(&mut self, subscriber: Subscriber) {
        self.store.subscribe(subscriber);
    }

    /// Events of an enabled mode overlapping `window`, or ±30 days around now.
    pub fn events(&self, key: &str, window: Option<TimeWindow>) -> ModesResult<Vec<CalendarEvent>> {
        self.unit(key)?;
        let window = window.unwrap_or_else(|| TimeWindow::around(self.clock.now()));
        Ok(self.store.query(key, &window))
    }

    pub fn create_event(&mut self, key: &str, draft: NewEvent) -> ModesResult<CalendarEvent> {
        self.unit(key)
            .inspect_err(|e| log_rejection("create_event", key, e))?;
        let now = self.clock.now();

        let event = self
            .store
            .create(key, draft, Origin::External, now)
            .inspect_err(|e| log_rejection("create_event", key, e))?;
        info!(mode = %key, uid = %event.uid, summary = %event.summary, "Event created");

        let link = self.link;
        if link.applies_to(key) {
            if let Err(e) = link.on_source_created(&mut self.store, &event, now) {
                error!(mode = %key, uid = %event.uid, error = %e, "Failed to create linked event");
            }
        }

        self.after_event_change(key);
        Ok(event)
    }

    pub fn update_event(
        &mut self,
        key: &str,
        uid: &str,
        patch: &EventPatch,
    ) -> ModesResult<CalendarEvent> {
        self.unit(key)
            .inspect_err(|e| log_rejection("update_event", key, e))?;

        let event = self
            .store
            .update(uid, key, patch, Origin::External)
            .inspect_err(|e| log_rejection("update_event", key, e))?;
        info!(mode = %key, uid = %uid, "Event updated");

        let link = self.link;
        if link.applies_to(key) {
            if let Err(e) = link.on_source_updated(&mut self.store, &event) {
                error!(mode = %key, uid = %uid, error = %e, "Failed to update linked event");
            }
        }

        self.after_event_change(key);
        Ok(event)
    }

    pub fn delete_event(&mut self, key: &str, uid: &str) -> ModesResult<CalendarEvent> {
        self.unit(key)
            .inspect_err(|e| log_rejection("delete_event", key, e))?;

        let removed = self
            .store
            .delete(uid, key, Origin::External)
            .inspect_err(|e| log_rejection("delete_event", key, e))?;
        info!(mode = %key, uid = %uid, "Event deleted");

        let link = self.link;
        if link.applies_to(key) {
            if let Err(e) = link.on_source_deleted(&mut self.store, uid) {
                error!(mode = %key, uid = %uid, error = %e, "Failed to delete linked event");
            }
        }

        self.after_event_change(key);
        Ok(removed)
    }

    /// Publish queued notifications, then re-evaluate the touched modes.
    fn after_event_change(&mut self, key: &str) {
        self.store.publish_pending();

        let mut affected = vec![key];
        if self.link.applies_to(key) {
            affected.push(self.link.target);
        }
        for mode in affected {
            if !self.units.contains_key(mode) {
                continue;
            }
            if let Err(e) = self.tick(mode) {
                warn!(mode = %mode, error = %e, "Tick after event change failed");
            }
        }
    }

    // ---- reconciliation --------------------------------------------------

    /// Evaluate one mode against its calendar.
    pub fn tick(&mut self, key: &str) -> ModesResult<TickDecision> {
        let now = self.clock.now();
        let (override_on, switch_on, link_target) = {
            let unit = self.unit(key)?;
            (unit.gate.is_on(), unit.switch.is_on(), unit.link_target)
        };

        let events = self.store.events_for(key);
        let projections = Projections::compute(&events, now);
        let active = projections.active.is_some();
        debug!(
            mode = %key,
            active = ?projections.active.as_ref().map(|e| &e.uid),
            next = ?projections.next.as_ref().map(|e| &e.uid),
            "Projections"
        );
        if let Some(unit) = self.units.get_mut(key) {
            unit.reconcile.observe(projections, now);
        }

        let decision = decide(override_on, active, switch_on);
        let result = match decision {
            TickDecision::TurnOn | TickDecision::TurnOff => {
                let transition = self
                    .unit(key)?
                    .switch
                    .plan_calendar(decision == TickDecision::TurnOn);
                self.apply_switch(key, transition).map(|_| ())
            }
            TickDecision::Suppressed => {
                debug!(mode = %key, "Override engaged, calendar ignored");
                Ok(())
            }
            TickDecision::NoOp => Ok(()),
        };

        if let Some(target) = link_target {
            self.drive_link_target(key, target, active);
        }

        result.map(|_| decision)
    }

    /// Force the link target ON while the source has an active event, and
    /// release it once, only if nothing else has taken control since.
    fn drive_link_target(&mut self, source: &str, target: &str, source_active: bool) {
        let Some(target_unit) = self.units.get(target) else {
            debug!(mode = %source, target = %target, "Link target not enabled");
            return;
        };
        let target_on = target_unit.switch.is_on();
        let target_by = target_unit.switch.controlled_by();
        let plan = target_unit.switch.plan_calendar(source_active);

        let forced = self
            .units
            .get(source)
            .map(|u| u.reconcile.forced_target)
            .unwrap_or(false);

        if source_active {
            if target_on {
                return;
            }
            match self.apply_switch(target, plan) {
                Ok(_) => {
                    info!(mode = %source, target = %target, "Forced link target ON");
                    self.set_forced(source, true);
                }
                Err(e) => {
                    error!(
                        mode = %source,
                        target = %target,
                        error = %e,
                        "Failed to force link target ON"
                    )
                }
            }
        } else if forced {
            self.set_forced(source, false);
            if target_on && target_by == ControlledBy::Calendar {
                match self.apply_switch(target, plan) {
                    Ok(_) => info!(mode = %source, target = %target, "Released link target"),
                    Err(e) => {
                        error!(
                            mode = %source,
                            target = %target,
                            error = %e,
                            "Failed to release link target"
                        )
                    }
                }
            } else {
                debug!(
                    mode = %source,
                    target = %target,
                    "Link target changed independently, leaving it"
                );
            }
        }
    }

    fn set_forced(&mut self, source: &str, forced: bool) {
        if let Some(unit) = self.units.get_mut(source) {
            unit.reconcile.forced_target = forced;
        }
    }

    /// Tick every enabled mode, logging failures.
    pub fn tick_all(&mut self) {
        for key in self.order.clone() {
            if let Err(e) = self.tick(&key) {
                warn!(mode = %key, error = %e, "Tick failed");
            }
        }
    }

    // ---- timers ----------------------------------------------------------

    pub fn set_timer_waker(&mut self, waker: Arc<Notify>) {
        self.timers.set_waker(waker);
    }

    pub fn next_timer_deadline(&self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    pub fn timer_deadline(&self, key: &str) -> Option<Timestamp> {
        self.timers.deadline(key)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.pending_count()
    }

    /// Expire every switch whose timer is due. Returns how many turned OFF.
    pub fn fire_due_timers(&mut self) -> usize {
        let now = self.clock.now();
        let mut fired = 0;

        for key in self.timers.take_due(now) {
            let Some(plan) = self.units.get(&key).and_then(|u| u.switch.plan_timer_fire()) else {
                debug!(mode = %key, "Timer fired for a switch that is no longer timed");
                continue;
            };
            match self.apply_switch(&key, plan) {
                Ok(_) => fired += 1,
                Err(e) => error!(mode = %key, error = %e, "Timer expiry failed"),
            }
        }
        fired
    }

    // ---- lifecycle -------------------------------------------------------

    /// Turn every ON mode OFF. Overrides are left alone.
    pub fn daily_reset(&mut self) -> usize {
        let mut reset = 0;
        for key in self.order.clone() {
            let Some(plan) = self.units.get(&key).and_then(|u| u.switch.plan_auto_reset()) else {
                continue;
            };
            match self.apply_switch(&key, plan) {
                Ok(_) => reset += 1,
                Err(e) => error!(mode = %key, error = %e, "Auto-reset failed"),
            }
        }
        info!(count = reset, "Daily auto-reset");
        reset
    }

    /// Re-assert switches restored ON that went OFF during startup. Runs once.
    pub fn host_started(&mut self) -> usize {
        if self.started {
            return 0;
        }
        self.started = true;

        let now = self.clock.now();
        let mut reasserted = 0;
        for key in self.order.clone() {
            let plan = self.units.get(&key).and_then(|u| u.switch.plan_reassert(now));
            if let Some(plan) = plan {
                match self.apply_switch(&key, plan) {
                    Ok(_) => {
                        info!(mode = %key, "Reasserted restored ON state");
                        reasserted += 1;
                    }
                    Err(e) => error!(mode = %key, error = %e, "Reassert failed"),
                }
            }
            if let Some(unit) = self.units.get_mut(&key) {
                unit.switch.clear_restored_intent();
            }
        }
        reasserted
    }

    /// Cancel the mode's timer and drop its state. Returns false when the
    /// mode was not enabled.
    pub fn disable_mode(&mut self, key: &str) -> bool {
        if self.units.remove(key).is_none() {
            return false;
        }
        self.timers.cancel(key);
        self.order.retain(|k| k != key);
        info!(mode = %key, "Mode disabled");
        true
    }

    // ---- views -----------------------------------------------------------

    pub fn status(&self, key: &str) -> ModesResult<ModeStatus> {
        let unit = self.unit(key)?;
        let now = self.clock.now();
        let projections = Projections::compute(&self.store.events_for(key), now);
        let record = unit.switch.record();

        Ok(ModeStatus {
            key: key.to_string(),
            name: mode_friendly(key).to_string(),
            group: find_mode(key)
                .map(|m| m.group)
                .ok_or_else(|| ModesError::mode_not_enabled(key))?,
            is_on: record.is_on,
            controlled_by: record.controlled_by,
            expire_at: record.expire_at,
            override_on: unit.gate.is_on(),
            event_active: projections.active.is_some(),
            active: projections.active,
            next: projections.next,
            last_ended: unit.reconcile.last_ended,
        })
    }

    pub fn statuses(&self) -> Vec<ModeStatus> {
        self.order
            .iter()
            .filter_map(|key| self.status(key).ok())
            .collect()
    }

    pub fn ledger_snapshot(&self) -> LedgerSnapshot {
        let now = self.clock.now();
        self.ledger
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .snapshot(now)
    }

    pub fn sweep_ledger(&self) -> usize {
        let now = self.clock.now();
        self.ledger
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .sweep(now)
    }
}

fn log_rejection(operation: &str, key: &str, e: &ModesError) {
    match e {
        ModesError::Persistence(_) | ModesError::Io(_) | ModesError::Serialization(_) => {
            error!(operation, mode = %key, kind = e.kind(), error = %e, "Command failed")
        }
        _ => warn!(operation, mode = %key, kind = e.kind(), error = %e, "Command rejected"),
    }
}
