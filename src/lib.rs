//! SDN Journal - durable replay of network intents to an SDN controller
//!
//! Network and port changes are recorded as journal rows in a SQLite
//! database. A background worker replays them against the controller's REST
//! API in dependency order and follows the controller's asynchronous jobs
//! until they finish.
//!
//! ## Architecture
//!
//! ```text
//! producer ──record──> journal table <──claim── sync worker ──HTTP──> controller
//!     │                     ^                       ^
//!     └──────wake───────────┼──────> signal ────────┘
//!                           │
//!              maintenance scheduler (retention, orphan recovery)
//! ```
//!
//! Several processes may share one database file. Row claims and the
//! maintenance lock are atomic across them.
//!
//! ## Row lifecycle
//!
//! | State      | Meaning                                        |
//! |------------|------------------------------------------------|
//! | pending    | waiting to be sent                             |
//! | processing | claimed by a worker                            |
//! | monitoring | accepted by the controller, job being polled   |
//! | completed  | done, deleted after the retention window       |
//! | failed     | retries exhausted, kept for inspection         |

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod journal;

pub use client::{SdnClient, SdnResponse};
pub use config::Config;
pub use db::{JournalDb, JournalRow, ObjectType, Operation, RetryLimit, RowState};
pub use error::{ClientError, JournalError, StoreError};
pub use journal::{JournalRecorder, JournalService, JournalSync, SyncSignal, ValidatorRegistry};
