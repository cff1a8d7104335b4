//! Sync wake-up signal
//!
//! Producers call [`SyncSignal::wake`] after recording rows; the sync worker
//! blocks in [`SyncSignal::wait_and_clear`]. Wakes that arrive while the
//! worker is busy collapse into a single pending wake. A timer task wakes
//! the worker whenever `interval` passes without any wake, so the journal is
//! drained even when nobody calls `wake`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

struct SignalState {
    woken: bool,
    deadline: Instant,
}

pub struct SyncSignal {
    state: Mutex<SignalState>,
    notify: Notify,
    interval: Duration,
}

impl SyncSignal {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: Mutex::new(SignalState {
                woken: false,
                deadline: Instant::now() + interval,
            }),
            notify: Notify::new(),
            interval,
        }
    }

    /// Request a sync pass and push the timer deadline back by one interval.
    pub fn wake(&self) {
        {
            let mut state = self.lock_state();
            state.woken = true;
            state.deadline = Instant::now() + self.interval;
        }
        self.notify.notify_one();
    }

    /// Block until woken, then consume the wake.
    pub async fn wait_and_clear(&self) {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock_state();
                if state.woken {
                    state.woken = false;
                    return;
                }
            }
            notified.await;
        }
    }

    /// Whether a wake is waiting to be consumed.
    pub fn is_woken(&self) -> bool {
        self.lock_state().woken
    }

    fn deadline(&self) -> Instant {
        self.lock_state().deadline
    }

    // The state is two plain fields; a panic elsewhere cannot leave them torn.
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the periodic wake timer. Stops when `shutdown` flips to true.
    pub fn spawn_timer(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let signal = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let deadline = signal.deadline();
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        // A wake in the meantime moved the deadline; sleep again
                        if Instant::now() >= signal.deadline() {
                            debug!("Sync interval elapsed, waking worker");
                            signal.wake();
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Sync timer stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
