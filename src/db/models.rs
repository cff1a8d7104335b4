//! Journal data model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Lifecycle state of a journal row.
///
/// ```text
/// Pending ──claim──> Processing ──501──────────> Completed
///    ^                   │      ──job accepted─> Monitoring ──job done──> Completed
///    └───────────────────┘                           │
///    └── job failed / controller unreachable ────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowState {
    Pending,
    Processing,
    Monitoring,
    Completed,
    Failed,
}

impl RowState {
    pub const ALL: [RowState; 5] = [
        RowState::Pending,
        RowState::Processing,
        RowState::Monitoring,
        RowState::Completed,
        RowState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RowState::Pending => "pending",
            RowState::Processing => "processing",
            RowState::Monitoring => "monitoring",
            RowState::Completed => "completed",
            RowState::Failed => "failed",
        }
    }

    /// Rows in these states still block dependent rows.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, RowState::Pending | RowState::Processing)
    }
}

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RowState::Pending),
            "processing" => Ok(RowState::Processing),
            "monitoring" => Ok(RowState::Monitoring),
            "completed" => Ok(RowState::Completed),
            "failed" => Ok(RowState::Failed),
            other => Err(StoreError::Corrupt(format!("unknown row state '{}'", other))),
        }
    }
}

/// Intent recorded for a resource. Stored with its HTTP verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Wire vocabulary used in the journal table and towards the controller.
    pub fn as_verb(&self) -> &'static str {
        match self {
            Operation::Create => "POST",
            Operation::Update => "PUT",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_verb())
    }
}

impl FromStr for Operation {
    type Err = StoreError;

    /// Accepts both the verb (`POST`) and the intent name (`create`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "post" | "create" => Ok(Operation::Create),
            "put" | "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(StoreError::Corrupt(format!("unknown operation '{}'", other))),
        }
    }
}

/// Resource kind tag. The set is open: collaborators may journal any tag
/// that has a validator registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectType(String);

impl ObjectType {
    pub const NETWORK: &'static str = "network";
    pub const PORT: &'static str = "port";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn network() -> Self {
        Self::new(Self::NETWORK)
    }

    pub fn port() -> Self {
        Self::new(Self::PORT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resource path segment on the controller
    pub fn url_path(&self) -> String {
        self.0.replace('_', "-")
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// One durable record of an intended change on the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRow {
    pub id: Uuid,
    pub object_type: ObjectType,
    pub object_uuid: String,
    pub operation: Operation,
    /// JSON snapshot of the resource at enqueue time
    pub data: String,
    pub job_id: Option<String>,
    pub state: RowState,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_retried: DateTime<Utc>,
}

impl JournalRow {
    pub(crate) fn from_row(row: &rusqlite::Row) -> Result<Self, rusqlite::Error> {
        let id: String = row.get("id")?;
        let object_type: String = row.get("object_type")?;
        let operation: String = row.get("operation")?;
        let state: String = row.get("state")?;
        let retry_count: i64 = row.get("retry_count")?;
        let created_at: i64 = row.get("created_at")?;
        let last_retried: i64 = row.get("last_retried")?;

        Ok(Self {
            id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
            object_type: ObjectType::new(object_type),
            object_uuid: row.get("object_uuid")?,
            operation: operation.parse().map_err(|e| conversion_error(3, e))?,
            data: row.get("data")?,
            job_id: row.get("job_id")?,
            state: state.parse().map_err(|e| conversion_error(6, e))?,
            retry_count: u32::try_from(retry_count).map_err(|e| conversion_error(7, e))?,
            created_at: from_micros(created_at).map_err(|e| conversion_error(8, e))?,
            last_retried: from_micros(last_retried).map_err(|e| conversion_error(9, e))?,
        })
    }

    /// Deserialize the stored resource snapshot.
    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

/// How many times a row may be retried after connectivity failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    Unlimited,
    Max(u32),
}

impl RetryLimit {
    /// Map the configuration convention (`-1` = unlimited).
    pub fn from_config(value: i64) -> Self {
        if value < 0 {
            RetryLimit::Unlimited
        } else {
            RetryLimit::Max(u32::try_from(value).unwrap_or(u32::MAX))
        }
    }

    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        match self {
            RetryLimit::Unlimited => false,
            RetryLimit::Max(max) => retry_count >= *max,
        }
    }
}

/// State of the shared maintenance critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    /// Lock is free
    Pending,
    /// Lock is held by some process
    Processing,
}

impl LockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockState::Pending => "pending",
            LockState::Processing => "processing",
        }
    }
}

impl FromStr for LockState {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LockState::Pending),
            "processing" => Ok(LockState::Processing),
            other => Err(StoreError::Corrupt(format!("unknown lock state '{}'", other))),
        }
    }
}

/// The single maintenance lock record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceLock {
    pub state: LockState,
    pub processing_operation: Option<String>,
    pub lock_updated: DateTime<Utc>,
}

impl MaintenanceLock {
    pub(crate) fn from_row(row: &rusqlite::Row) -> Result<Self, rusqlite::Error> {
        let state: String = row.get("state")?;
        let lock_updated: i64 = row.get("lock_updated")?;
        Ok(Self {
            state: state.parse().map_err(|e| conversion_error(0, e))?,
            processing_operation: row.get("processing_operation")?,
            lock_updated: from_micros(lock_updated).map_err(|e| conversion_error(2, e))?,
        })
    }
}

pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", micros)))
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}
