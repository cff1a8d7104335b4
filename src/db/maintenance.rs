//! Maintenance lock record
//!
//! A single row guards housekeeping so that only one process runs it at a
//! time. Acquire and release are compare-and-set flips inside an IMMEDIATE
//! transaction; losing the race is a normal outcome, not an error.

use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::journal::now;
use super::models::{to_micros, LockState, MaintenanceLock};
use super::schema::MAINTENANCE_LOCK_ID;
use super::JournalDb;
use crate::error::StoreError;

impl JournalDb {
    /// Try to take the maintenance lock. Returns `false` if another process
    /// holds it.
    pub fn acquire_maintenance_lock(&self) -> Result<bool, StoreError> {
        self.flip_lock(LockState::Pending, LockState::Processing)
    }

    /// Release the maintenance lock. Returns `false` if it was not held.
    pub fn release_maintenance_lock(&self) -> Result<bool, StoreError> {
        self.flip_lock(LockState::Processing, LockState::Pending)
    }

    /// Record which housekeeping operation is running, or clear it.
    pub fn update_maintenance_operation(&self, operation: Option<&str>) -> Result<(), StoreError> {
        self.retry_on_conflict("update_maintenance_operation", |conn| {
            let updated = conn.execute(
                "UPDATE maintenance SET processing_operation = ?1, lock_updated = ?2 WHERE id = ?3",
                params![operation, to_micros(now()), MAINTENANCE_LOCK_ID],
            )?;
            if updated == 0 {
                return Err(StoreError::MissingLock);
            }
            Ok(())
        })
    }

    /// Current lock record.
    pub fn maintenance_lock(&self) -> Result<MaintenanceLock, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT state, processing_operation, lock_updated FROM maintenance WHERE id = ?1",
                [MAINTENANCE_LOCK_ID],
                MaintenanceLock::from_row,
            )
            .optional()?
            .ok_or(StoreError::MissingLock)
        })
    }

    fn flip_lock(&self, from: LockState, to: LockState) -> Result<bool, StoreError> {
        let flipped = self.retry_on_conflict("flip_maintenance_lock", |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let current: Option<String> = tx
                .query_row(
                    "SELECT state FROM maintenance WHERE id = ?1",
                    [MAINTENANCE_LOCK_ID],
                    |r| r.get(0),
                )
                .optional()?;
            let current: LockState = current.ok_or(StoreError::MissingLock)?.parse()?;
            if current != from {
                return Ok(false);
            }

            let updated = tx.execute(
                "UPDATE maintenance SET state = ?1, lock_updated = ?2 WHERE id = ?3 AND state = ?4",
                params![to.as_str(), to_micros(now()), MAINTENANCE_LOCK_ID, from.as_str()],
            )?;
            if updated != 1 {
                return Err(StoreError::Conflict("maintenance lock changed concurrently".into()));
            }
            tx.commit()?;
            Ok(true)
        })?;

        debug!(from = from.as_str(), to = to.as_str(), flipped, "Maintenance lock flip");
        Ok(flipped)
    }
}
