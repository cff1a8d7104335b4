//! Database schema definitions

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;

use super::models::{to_micros, LockState};
use crate::error::StoreError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Primary key of the single maintenance record
pub const MAINTENANCE_LOCK_ID: &str = "journal";

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new journal schema v{}", SCHEMA_VERSION);
        conn.execute_batch(JOURNAL_SCHEMA)?;
        conn.execute_batch(MAINTENANCE_SCHEMA)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating journal schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    seed_maintenance_lock(conn)?;

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32, StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), StoreError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// The maintenance record is created once and never deleted.
fn seed_maintenance_lock(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO maintenance (id, state, processing_operation, lock_updated)
         VALUES (?1, ?2, NULL, ?3)",
        params![MAINTENANCE_LOCK_ID, LockState::Pending.as_str(), to_micros(Utc::now())],
    )?;
    Ok(())
}

/// Journal table schema
const JOURNAL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS journal (
    id TEXT PRIMARY KEY,
    object_type TEXT NOT NULL,
    object_uuid TEXT NOT NULL,
    operation TEXT NOT NULL,
    data TEXT NOT NULL,
    job_id TEXT,
    state TEXT NOT NULL DEFAULT 'pending'
        CHECK (state IN ('pending', 'processing', 'monitoring', 'completed', 'failed')),
    retry_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    last_retried INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_journal_state_last_retried ON journal(state, last_retried);
CREATE INDEX IF NOT EXISTS idx_journal_object_uuid ON journal(object_uuid, state);
"#;

/// Maintenance lock schema
const MAINTENANCE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS maintenance (
    id TEXT PRIMARY KEY,
    state TEXT NOT NULL CHECK (state IN ('pending', 'processing')),
    processing_operation TEXT,
    lock_updated INTEGER NOT NULL
);
"#;
