//! Daemon configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::db::RetryLimit;
use crate::error::ClientError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub controller: ControllerConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// SDN controller connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Controller base URL, e.g. `http://10.0.0.1/neo`
    pub url: String,

    /// Domain segment for resource calls
    #[serde(default = "default_domain")]
    pub domain: String,

    pub username: String,

    pub password: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            domain: default_domain(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// SQLite database shared by every sync process on the host
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Wake the sync worker at least this often
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Retries after connectivity failures (-1 = forever)
    #[serde(default = "default_retry_count")]
    pub retry_count: i64,

    /// How long SQLite waits on a locked database before reporting busy
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            sync_interval_secs: default_sync_interval(),
            retry_count: default_retry_count(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Seconds between maintenance ticks
    #[serde(default = "default_maintenance_interval")]
    pub interval_secs: u64,

    /// Keep completed rows this long (-1 = forever)
    #[serde(default = "default_completed_retention")]
    pub completed_rows_retention_secs: i64,

    /// Processing rows older than this are considered orphaned
    #[serde(default = "default_processing_timeout")]
    pub processing_timeout_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_maintenance_interval(),
            completed_rows_retention_secs: default_completed_retention(),
            processing_timeout_secs: default_processing_timeout(),
        }
    }
}

// Defaults
fn default_domain() -> String { "cloudx".to_string() }
fn default_timeout() -> u64 { 10 }
fn default_database_path() -> PathBuf { PathBuf::from("/var/lib/sdn-journal/journal.db") }
fn default_sync_interval() -> u64 { 10 }
fn default_retry_count() -> i64 { -1 }
fn default_busy_timeout() -> u64 { 1000 }
fn default_maintenance_interval() -> u64 { 300 }
fn default_completed_retention() -> i64 { 600 }
fn default_processing_timeout() -> u64 { 100 }

impl Config {
    /// Read a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let controller = &self.controller;
        if controller.url.trim().is_empty() {
            return Err(ClientError::MissingOption("url").into());
        }
        if controller.username.is_empty() {
            return Err(ClientError::MissingOption("username").into());
        }
        if controller.password.is_empty() {
            return Err(ClientError::MissingOption("password").into());
        }
        if self.journal.sync_interval_secs == 0 {
            anyhow::bail!("journal.sync_interval_secs must be greater than zero");
        }
        if self.maintenance.interval_secs == 0 {
            anyhow::bail!("maintenance.interval_secs must be greater than zero");
        }
        if self.journal.retry_count < -1 {
            anyhow::bail!("journal.retry_count must be -1 (unlimited) or a non-negative count");
        }
        Ok(())
    }

    pub fn retry_limit(&self) -> RetryLimit {
        RetryLimit::from_config(self.journal.retry_count)
    }

    /// `None` when completed rows are kept forever.
    pub fn completed_retention(&self) -> Option<Duration> {
        u64::try_from(self.maintenance.completed_rows_retention_secs)
            .ok()
            .map(Duration::from_secs)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.maintenance.processing_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.journal.sync_interval_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance.interval_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.journal.busy_timeout_ms)
    }
}
