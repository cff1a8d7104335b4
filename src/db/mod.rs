//! SQLite-backed journal store
//!
//! The store owns every journal row and the maintenance lock record. Several
//! processes may open the same database file; SQLite's write lock plus the
//! bounded retry in [`JournalDb::retry_on_conflict`] keep state transitions
//! exclusive across them.
//!
//! ## Tables
//!
//! - `journal` - pending/in-flight/finished work items
//! - `maintenance` - single-row lock serializing housekeeping
//! - `schema_version` - migration bookkeeping

pub mod journal;
pub mod maintenance;
pub mod models;
pub mod schema;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::StoreError;

pub use models::{JournalRow, LockState, MaintenanceLock, ObjectType, Operation, RetryLimit, RowState};

/// Attempts made for a write before a conflict is surfaced to the caller
pub const MAX_RETRIES: u32 = 10;

const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// Journal database handle. One per process (or per simulated process in tests).
pub struct JournalDb {
    conn: Mutex<Connection>,
}

impl JournalDb {
    /// Open or create the journal database at `db_path`.
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!(path = %db_path.display(), "Opening journal database");

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(busy_timeout)?;
        // WAL lets readers proceed while another process holds the write lock
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.retry_on_conflict("init_schema", |conn| schema::init_schema(conn))?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        debug!("Opening in-memory journal database");

        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` against the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }

    /// Run `f` with exclusive access, e.g. to open a transaction.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut conn)
    }

    /// Run a write, retrying the whole operation while it loses races against
    /// other writers. Non-conflict errors are returned immediately.
    pub fn retry_on_conflict<F, T>(&self, op: &str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut Connection) -> Result<T, StoreError>,
    {
        let mut attempt = 1;
        loop {
            match self.with_conn_mut(&mut f) {
                Err(e) if e.is_conflict() => {
                    if attempt >= MAX_RETRIES {
                        warn!(op, attempts = attempt, error = %e, "Giving up after repeated write conflicts");
                        return Err(StoreError::ConflictExhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                    debug!(op, attempt, error = %e, "Write conflict, retrying");
                    std::thread::sleep(RETRY_BACKOFF * attempt);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
