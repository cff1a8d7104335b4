//! Periodic journal maintenance
//!
//! Each tick tries to take the shared maintenance lock. The process that gets
//! it runs every registered operation in order; everyone else skips the tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::db::JournalDb;
use crate::error::StoreError;

/// A housekeeping step. Failures are logged and do not stop later steps.
pub type MaintenanceOperation = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

pub struct MaintenanceScheduler {
    db: Arc<JournalDb>,
    interval: Duration,
    operations: Vec<(String, MaintenanceOperation)>,
    /// Set while this scheduler owns the lock, including after a failed release.
    holding_lock: AtomicBool,
}

impl MaintenanceScheduler {
    pub fn new(db: Arc<JournalDb>, interval: Duration) -> Self {
        Self {
            db,
            interval,
            operations: Vec::new(),
            holding_lock: AtomicBool::new(false),
        }
    }

    /// Append an operation; operations run in registration order.
    pub fn register_operation<F>(&mut self, name: impl Into<String>, operation: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.operations.push((name.into(), Box::new(operation)));
    }

    /// Run one maintenance round if the lock is free. Returns whether it ran.
    ///
    /// If the lock cannot be released afterwards, the scheduler keeps it and
    /// the next tick runs on it and tries the release again.
    pub fn tick(&self) -> Result<bool, StoreError> {
        if self.holding_lock.load(Ordering::SeqCst) {
            warn!("Maintenance lock still held from a failed release, reusing it");
        } else if self.db.acquire_maintenance_lock()? {
            self.holding_lock.store(true, Ordering::SeqCst);
        } else {
            debug!("Maintenance lock held elsewhere, skipping tick");
            return Ok(false);
        }

        for (name, operation) in &self.operations {
            self.execute_operation(name, operation);
        }

        if let Err(e) = self.db.update_maintenance_operation(None) {
            error!(error = %e, "Failed to clear maintenance operation");
        }
        match self.db.release_maintenance_lock() {
            Ok(released) => {
                if !released {
                    warn!("Maintenance lock was not in processing state at release");
                }
                self.holding_lock.store(false, Ordering::SeqCst);
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "Failed to release maintenance lock, retrying next tick");
                Err(e)
            }
        }
    }

    fn execute_operation(&self, name: &str, operation: &MaintenanceOperation) {
        if let Err(e) = self.db.update_maintenance_operation(Some(name)) {
            error!(operation = name, error = %e, "Failed to record maintenance operation");
        }

        debug!(operation = name, "Starting maintenance operation");
        match operation() {
            Ok(()) => info!(operation = name, "Finished maintenance operation"),
            Err(e) => error!(operation = name, error = %e, "Maintenance operation failed"),
        }
    }

    /// Run [`tick`](Self::tick) every interval until `shutdown` flips to true.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Maintenance scheduler started");

            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; maintenance starts one interval in
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick() {
                            error!(error = %e, "Maintenance tick failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Maintenance scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}
