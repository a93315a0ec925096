//! Background tasks driving a shared engine.
//!
//! One periodic tick task per enabled mode, a timer driver that sleeps until
//! the earliest armed expiration, an optional daily auto-reset, and a ledger
//! sweep. No task holds the engine lock across an await point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::AutoResetTime;
use crate::engine::{SharedEngine, lock_engine};

/// Interval between ledger sweeps.
const LEDGER_SWEEP_SECS: u64 = 60;

pub struct ModesRuntime {
    engine: SharedEngine,
    waker: Arc<Notify>,
    tick_tasks: HashMap<String, JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

impl ModesRuntime {
    /// Spawn every task. Must be called from within a tokio runtime.
    pub fn start(engine: SharedEngine) -> Self {
        let waker = Arc::new(Notify::new());

        let (keys, tick_interval, auto_reset, time_zone) = {
            let mut guard = lock_engine(&engine);
            guard.set_timer_waker(waker.clone());
            let settings = guard.settings();
            (
                guard.mode_keys().to_vec(),
                settings.tick_interval,
                settings.auto_reset,
                settings.time_zone,
            )
        };

        let tick_tasks: HashMap<String, JoinHandle<()>> = keys
            .into_iter()
            .map(|key| {
                let handle = spawn_tick(engine.clone(), key.clone(), tick_interval);
                (key, handle)
            })
            .collect();

        let mut background = vec![
            spawn_timer_driver(engine.clone(), waker.clone()),
            spawn_ledger_sweep(engine.clone()),
        ];
        if let Some(at) = auto_reset {
            background.push(spawn_daily_reset(engine.clone(), at, time_zone));
        }

        info!(
            modes = tick_tasks.len(),
            tick_interval = %humantime::format_duration(tick_interval),
            auto_reset = ?auto_reset.map(|at| at.time()),
            "Runtime started"
        );

        ModesRuntime {
            engine,
            waker,
            tick_tasks,
            background,
        }
    }

    /// Signal that startup finished; reasserts restored switches once.
    pub fn host_started(&self) -> usize {
        lock_engine(&self.engine).host_started()
    }

    /// Make the timer driver re-read the clock and the earliest deadline.
    pub fn wake_timers(&self) {
        self.waker.notify_one();
    }

    /// Stop ticking a mode, then drop it from the engine.
    pub fn disable_mode(&mut self, key: &str) -> bool {
        if let Some(handle) = self.tick_tasks.remove(key) {
            handle.abort();
        }
        lock_engine(&self.engine).disable_mode(key)
    }

    pub fn tick_task_count(&self) -> usize {
        self.tick_tasks.len()
    }

    pub fn shutdown(&mut self) {
        for (_, handle) in self.tick_tasks.drain() {
            handle.abort();
        }
        for handle in self.background.drain(..) {
            handle.abort();
        }
        info!("Runtime stopped");
    }
}

impl Drop for ModesRuntime {
    fn drop(&mut self) {
        for handle in self.tick_tasks.values().chain(self.background.iter()) {
            handle.abort();
        }
    }
}

fn spawn_tick(engine: SharedEngine, key: String, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let result = lock_engine(&engine).tick(&key);
            if let Err(e) = result {
                warn!(mode = %key, error = %e, "Tick failed");
            }
        }
    })
}

fn spawn_timer_driver(engine: SharedEngine, waker: Arc<Notify>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = {
                let guard = lock_engine(&engine);
                let now = guard.now();
                guard
                    .next_timer_deadline()
                    .map(|deadline| (deadline - now).to_std().unwrap_or(Duration::ZERO))
            };

            match wait {
                Some(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = waker.notified() => continue,
                    }
                }
                None => {
                    waker.notified().await;
                    continue;
                }
            }

            let fired = lock_engine(&engine).fire_due_timers();
            if fired > 0 {
                debug!(fired, "Expired timed switches");
            }
        }
    })
}

fn spawn_daily_reset(engine: SharedEngine, at: AutoResetTime, tz: Tz) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = {
                let guard = lock_engine(&engine);
                let now = guard.now();
                (at.next_after(now, tz) - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            };
            tokio::time::sleep(wait).await;
            lock_engine(&engine).daily_reset();
        }
    })
}

fn spawn_ledger_sweep(engine: SharedEngine) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(LEDGER_SWEEP_SECS));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            lock_engine(&engine).sweep_ledger();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Settings;
    use crate::engine::ModesEngine;
    use crate::storage::MemoryStorage;

    const TZ: Tz = chrono_tz::America::New_York;

    fn make_engine(keys: &[&str]) -> (Arc<ManualClock>, SharedEngine) {
        let clock = Arc::new(ManualClock::at(TZ, 2025, 3, 20, 10, 0));
        let mut settings = Settings::for_modes(keys, TZ);
        settings.tick_interval = Duration::from_millis(20);
        let engine = ModesEngine::open(settings, clock.clone(), Arc::new(MemoryStorage::new()))
            .unwrap()
            .into_shared();
        (clock, engine)
    }

    async fn wait_until(engine: &SharedEngine, check: impl Fn(&ModesEngine) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if check(&lock_engine(engine)) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_tick_tasks_reconcile_modes() {
        let (_, engine) = make_engine(&["home", "guest_room"]);
        lock_engine(&engine).turn_on("home", Some(0)).unwrap();

        let mut runtime = ModesRuntime::start(engine.clone());
        assert_eq!(runtime.tick_task_count(), 2);

        // No calendar event and no override: the tick turns it off
        wait_until(&engine, |e| e.switch_is_on("home") == Some(false)).await;
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_timer_driver_fires_after_clock_moves() {
        let (clock, engine) = make_engine(&["home"]);
        let mut runtime = ModesRuntime::start(engine.clone());
        // Keep the tick from turning the manual ON off
        lock_engine(&engine).set_override("home", true).unwrap();
        lock_engine(&engine).turn_on("home", Some(10)).unwrap();

        clock.advance(chrono::Duration::minutes(10));
        runtime.wake_timers();

        wait_until(&engine, |e| e.switch_is_on("home") == Some(false)).await;
        assert_eq!(lock_engine(&engine).pending_timers(), 0);
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_disable_mode_detaches_tick_and_timer() {
        let (_, engine) = make_engine(&["home", "guest_room"]);
        let mut runtime = ModesRuntime::start(engine.clone());
        lock_engine(&engine).set_override("home", true).unwrap();
        lock_engine(&engine).turn_on("home", Some(10)).unwrap();

        assert!(runtime.disable_mode("home"));
        assert_eq!(runtime.tick_task_count(), 1);
        let guard = lock_engine(&engine);
        assert_eq!(guard.pending_timers(), 0);
        assert!(!guard.is_enabled("home"));
        drop(guard);

        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_failed_tick_does_not_stop_ticking() {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::at(TZ, 2025, 3, 20, 10, 0));
        let mut settings = Settings::for_modes(&["home"], TZ);
        settings.tick_interval = Duration::from_millis(20);
        let engine = ModesEngine::open(settings, clock, storage.clone())
            .unwrap()
            .into_shared();
        lock_engine(&engine).turn_on("home", Some(0)).unwrap();

        storage.set_fail_writes(true);
        let mut runtime = ModesRuntime::start(engine.clone());

        // Every tick wants to turn the switch off and fails to persist it
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(lock_engine(&engine).switch_is_on("home"), Some(true));

        storage.set_fail_writes(false);
        wait_until(&engine, |e| e.switch_is_on("home") == Some(false)).await;
        runtime.shutdown();
    }

    #[tokio::test]
    async fn test_host_started_runs_once() {
        let (_, engine) = make_engine(&["home"]);
        let runtime = ModesRuntime::start(engine);
        assert_eq!(runtime.host_started(), 0);
        assert_eq!(runtime.host_started(), 0);
    }
}
