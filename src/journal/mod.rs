//! Journal processing
//!
//! Producers record intents through a [`JournalRecorder`]; the
//! [`JournalService`] owns the background tasks that replay them:
//!
//! - `sync` - drains pending rows and polls controller jobs
//! - `signal` - wake-up signal plus the periodic sync timer
//! - `maintenance` - lock-guarded housekeeping loop running `cleanup`
//! - `validation` - per object type dependency checks

pub mod cleanup;
pub mod maintenance;
pub mod signal;
pub mod sync;
pub mod validation;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::client::SdnClient;
use crate::config::Config;
use crate::db::{JournalDb, ObjectType, Operation};
use crate::error::{JournalError, StoreError};

pub use cleanup::JournalCleanup;
pub use maintenance::{MaintenanceOperation, MaintenanceScheduler};
pub use signal::SyncSignal;
pub use sync::JournalSync;
pub use validation::{DependencyQueries, Validator, ValidatorRegistry};

/// Producer entry point: records a row and wakes the sync worker.
#[derive(Clone)]
pub struct JournalRecorder {
    db: Arc<JournalDb>,
    signal: Arc<SyncSignal>,
}

impl JournalRecorder {
    pub fn new(db: Arc<JournalDb>, signal: Arc<SyncSignal>) -> Self {
        Self { db, signal }
    }

    pub fn record(
        &self,
        object_type: &ObjectType,
        object_uuid: &str,
        operation: Operation,
        data: &serde_json::Value,
    ) -> Result<Uuid, StoreError> {
        let id = self.db.create_pending(object_type, object_uuid, operation, data)?;
        self.signal.wake();
        Ok(id)
    }
}

/// Running sync worker, wake timer and maintenance scheduler.
pub struct JournalService {
    db: Arc<JournalDb>,
    signal: Arc<SyncSignal>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl JournalService {
    /// Open the configured database and start all background tasks.
    /// Must be called from within a tokio runtime.
    pub fn start(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;
        let db = Arc::new(JournalDb::open(&config.journal.database_path, config.busy_timeout())?);
        Ok(Self::start_with(db, config, ValidatorRegistry::with_defaults())?)
    }

    /// Start the background tasks on an already opened store.
    pub fn start_with(
        db: Arc<JournalDb>,
        config: &Config,
        validators: ValidatorRegistry,
    ) -> Result<Self, JournalError> {
        let client = SdnClient::new(&config.controller)?;
        let signal = Arc::new(SyncSignal::new(config.sync_interval()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let timer = signal.spawn_timer(shutdown_rx.clone());

        let sync = JournalSync::new(
            Arc::clone(&db),
            client,
            Arc::new(validators),
            Arc::clone(&signal),
            config.retry_limit(),
        );
        let worker_shutdown = shutdown_rx.clone();
        let worker = tokio::spawn(async move { sync.run(worker_shutdown).await });

        let cleanup = Arc::new(JournalCleanup::new(
            Arc::clone(&db),
            config.completed_retention(),
            config.processing_timeout(),
        ));
        let mut scheduler = MaintenanceScheduler::new(Arc::clone(&db), config.maintenance_interval());
        cleanup.register(&mut scheduler);
        let maintenance = scheduler.start(shutdown_rx);

        // Rows left over from a previous run are picked up right away
        signal.wake();

        info!(controller = %config.controller.url, "Journal service started");

        Ok(Self {
            db,
            signal,
            shutdown_tx,
            tasks: vec![timer, worker, maintenance],
        })
    }

    pub fn recorder(&self) -> JournalRecorder {
        JournalRecorder::new(Arc::clone(&self.db), Arc::clone(&self.signal))
    }

    pub fn db(&self) -> &Arc<JournalDb> {
        &self.db
    }

    /// Stop all background tasks. A sync pass in progress finishes first.
    pub async fn shutdown(self) {
        info!("Journal service shutting down");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Journal background task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RowState;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_record_creates_row_and_wakes_worker() {
        let db = Arc::new(JournalDb::open_in_memory().unwrap());
        let signal = Arc::new(SyncSignal::new(Duration::from_secs(60)));
        let recorder = JournalRecorder::new(Arc::clone(&db), Arc::clone(&signal));

        let id = recorder
            .record(&ObjectType::network(), "n1", Operation::Create, &json!({"id": "n1"}))
            .unwrap();

        assert_eq!(db.get_row(id).unwrap().unwrap().state, RowState::Pending);
        assert!(signal.is_woken());
    }
}
