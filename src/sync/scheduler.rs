//! SyncScheduler: throttle/coalesce layer over `SyncManager`, plus the
//! background and connectivity-transition triggers.
//!
//! Callers that ask for a pass while one is running or cooling down are
//! queued and share the next cycle's result, preventing sync storms while
//! guaranteeing that a request arriving mid-pass still gets a fresh pass
//! (the in-flight one may have read the dirty set before their mutation).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::manager::SyncManager;
use super::types::{NetworkGate, SyncOutcome, SyncPolicy};

pub struct SyncScheduler {
    manager: Arc<SyncManager>,
    throttle_ms: u64,
    slot: Arc<Mutex<ScheduleSlot>>,
    disposed: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Scheduling state for the single pass slot.
struct ScheduleSlot {
    running: bool,
    cooldown_active: bool,
    /// Queued waiters; they all share the next cycle's result.
    queued: Vec<oneshot::Sender<Result<SyncOutcome, String>>>,
}

impl ScheduleSlot {
    fn new() -> Self {
        Self {
            running: false,
            cooldown_active: false,
            queued: Vec::new(),
        }
    }
}

enum ScheduleAction {
    /// Slot is idle; caller runs the pass now.
    Run,
    /// Slot is busy; caller awaits a shared future result.
    Wait(oneshot::Receiver<Result<SyncOutcome, String>>),
}

impl SyncScheduler {
    /// `throttle_ms` is the cooldown between passes (default 1000).
    pub fn new(manager: Arc<SyncManager>, throttle_ms: Option<u64>) -> Self {
        Self {
            manager,
            throttle_ms: throttle_ms.unwrap_or(1000),
            slot: Arc::new(Mutex::new(ScheduleSlot::new())),
            disposed: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Request a pass. Coalesces with any in-flight or cooling-down cycle.
    pub async fn schedule(&self) -> Result<SyncOutcome, String> {
        self.check_disposed()?;

        let action = {
            let mut slot = self.slot.lock();
            if slot.running || slot.cooldown_active {
                let (tx, rx) = oneshot::channel();
                slot.queued.push(tx);
                ScheduleAction::Wait(rx)
            } else {
                slot.running = true;
                ScheduleAction::Run
            }
        };

        match action {
            ScheduleAction::Wait(rx) => rx.await.map_err(|_| "channel closed".to_string())?,
            ScheduleAction::Run => {
                let outcome = self.manager.sync().await;
                self.finish_cycle();
                Ok(outcome)
            }
        }
    }

    /// Bypass the throttle and run a pass immediately.
    pub async fn flush(&self) -> SyncOutcome {
        self.manager.sync().await
    }

    /// Trigger a pass whenever connectivity transitions from a class the
    /// policy rejects into one it allows, the opportunistic path.
    pub fn spawn_connectivity_trigger(self: Arc<Self>, gate: Arc<dyn NetworkGate>, policy: SyncPolicy) {
        let scheduler = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut rx = gate.watch();
            let mut previous = *rx.borrow();
            while rx.changed().await.is_ok() {
                let current = *rx.borrow();
                if policy.allows(current)
                    && !policy.allows(previous)
                    && scheduler.schedule().await.is_err()
                {
                    break;
                }
                previous = current;
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Periodic background trigger. Each tick requests a pass; the manager's
    /// own guard and gating policy decide whether it actually runs.
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration) {
        let scheduler = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so construction does
            // not imply an instant pass.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if scheduler.schedule().await.is_err() {
                    break;
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Stop spawned triggers and reject queued waiters.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);

        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }

        let mut slot = self.slot.lock();
        for sender in slot.queued.drain(..) {
            let _ = sender.send(Err("SyncScheduler is disposed".to_string()));
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn check_disposed(&self) -> Result<(), String> {
        if self.disposed.load(Ordering::SeqCst) {
            Err("SyncScheduler is disposed".to_string())
        } else {
            Ok(())
        }
    }

    /// Close out a cycle: enter cooldown, and if waiters queued up during
    /// the run or the cooldown, serve them all with one follow-up pass.
    fn finish_cycle(&self) {
        let initial_waiters = {
            let mut slot = self.slot.lock();
            slot.running = false;
            slot.cooldown_active = true;
            slot.queued.drain(..).collect::<Vec<_>>()
        };

        let slot = Arc::clone(&self.slot);
        let manager = Arc::clone(&self.manager);
        let disposed = Arc::clone(&self.disposed);
        let throttle_ms = self.throttle_ms;

        tokio::spawn(async move {
            let mut pending = initial_waiters;

            loop {
                tokio::time::sleep(Duration::from_millis(throttle_ms)).await;

                // Pick up waiters that arrived during the cooldown.
                let cooldown_waiters = {
                    let mut slot = slot.lock();
                    slot.cooldown_active = false;
                    slot.queued.drain(..).collect::<Vec<_>>()
                };
                pending.extend(cooldown_waiters);

                if pending.is_empty() {
                    break;
                }
                if disposed.load(Ordering::SeqCst) {
                    for sender in pending {
                        let _ = sender.send(Err("SyncScheduler is disposed".to_string()));
                    }
                    break;
                }

                {
                    let mut slot = slot.lock();
                    slot.running = true;
                }

                let outcome = manager.sync().await;

                // Waiters arriving during this follow-up roll into another
                // cooldown cycle.
                let during_run = {
                    let mut slot = slot.lock();
                    slot.running = false;
                    slot.cooldown_active = true;
                    slot.queued.drain(..).collect::<Vec<_>>()
                };

                for sender in pending {
                    let _ = sender.send(Ok(outcome.clone()));
                }

                if during_run.is_empty() {
                    let mut slot = slot.lock();
                    slot.cooldown_active = false;
                    break;
                }
                pending = during_run;
            }
        });
    }
}
