//! Error types for sdn-journal

use thiserror::Error;

/// Errors raised by the journal store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Another writer won the race for the same row or lock record.
    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Write conflict persisted after {attempts} attempts: {last}")]
    ConflictExhausted { attempts: u32, last: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt journal data: {0}")]
    Corrupt(String),

    #[error("Maintenance lock record is missing")]
    MissingLock,

    #[error("Connection lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the whole operation may succeed.
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::Conflict(_) => true,
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Errors raised while talking to the SDN controller.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Login to {login_url} failed: {reason}")]
    Login { login_url: String, reason: String },

    #[error("Failed to send request to URL {url}: {reason}")]
    Connection { url: String, reason: String },

    #[error("Missing mandatory controller option: {0}")]
    MissingOption(&'static str),

    #[error("Failed to serialize request body: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    pub fn is_login(&self) -> bool {
        matches!(self, ClientError::Login { .. })
    }
}

/// Top-level error for journal processing.
#[derive(Error, Debug)]
pub enum JournalError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("No dependency validator registered for object type {0}")]
    UnregisteredType(String),

    #[error("A dependency validator is already registered for object type {0}")]
    DuplicateValidator(String),
}
