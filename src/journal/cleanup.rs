//! Built-in journal housekeeping

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::maintenance::MaintenanceScheduler;
use crate::db::{JournalDb, RowState};
use crate::error::StoreError;

/// Retention of completed rows and recovery of orphaned processing rows.
pub struct JournalCleanup {
    db: Arc<JournalDb>,
    /// `None` keeps completed rows forever
    retention: Option<Duration>,
    processing_timeout: Duration,
}

impl JournalCleanup {
    pub fn new(db: Arc<JournalDb>, retention: Option<Duration>, processing_timeout: Duration) -> Self {
        Self {
            db,
            retention,
            processing_timeout,
        }
    }

    /// Delete completed rows older than the retention window.
    pub fn delete_completed_rows(&self) -> Result<usize, StoreError> {
        let Some(retention) = self.retention else {
            return Ok(0);
        };
        debug!(retention_secs = retention.as_secs(), "Deleting completed rows");
        self.db.delete_by_state_older_than(RowState::Completed, retention)
    }

    /// Return rows stuck in PROCESSING (crashed or hung worker) to PENDING.
    pub fn cleanup_processing_rows(&self) -> Result<usize, StoreError> {
        let count = self.db.reset_stale_processing(self.processing_timeout)?;
        if count > 0 {
            info!(count, "Reset orphaned rows back to pending");
        }
        Ok(count)
    }

    /// Register both operations, retention first.
    pub fn register(self: &Arc<Self>, scheduler: &mut MaintenanceScheduler) {
        let cleanup = Arc::clone(self);
        scheduler.register_operation("delete_completed_rows", move || {
            cleanup.delete_completed_rows()?;
            Ok(())
        });

        let cleanup = Arc::clone(self);
        scheduler.register_operation("cleanup_processing_rows", move || {
            cleanup.cleanup_processing_rows()?;
            Ok(())
        });
    }
}
