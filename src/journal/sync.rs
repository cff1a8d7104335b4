//! Journal sync worker
//!
//! Drains PENDING rows towards the controller one at a time and polls the
//! jobs of MONITORING rows until the controller reports them finished.
//!
//! ## Row outcomes
//!
//! | Controller answer              | Row becomes                      |
//! |--------------------------------|----------------------------------|
//! | 501 Not Implemented            | COMPLETED                        |
//! | accepted with a job handle     | MONITORING                       |
//! | accepted without a job handle  | retried (PENDING or FAILED)      |
//! | unreachable / error status     | retried, pass aborted            |
//! | login rejected                 | PENDING, pass aborted            |

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::signal::SyncSignal;
use super::validation::ValidatorRegistry;
use crate::client::{strings_to_url, SdnClient};
use crate::db::{JournalDb, JournalRow, Operation, RetryLimit, RowState};
use crate::error::JournalError;

/// Job link in the HTML some controller versions return instead of JSON.
const JOB_LINK_PATTERN: &str = r#"<a href="([a-zA-Z0-9/]+)">"#;

/// JSON object fields that may carry the job handle, in lookup order.
const JOB_ID_FIELDS: [&str; 4] = ["url", "job_url", "job_id", "id"];

static JOB_LINK: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    #[serde(rename = "Status")]
    status: Option<String>,
}

pub struct JournalSync {
    db: Arc<JournalDb>,
    client: SdnClient,
    validators: Arc<ValidatorRegistry>,
    signal: Arc<SyncSignal>,
    retry_limit: RetryLimit,
    exit_after_run: bool,
}

impl JournalSync {
    pub fn new(
        db: Arc<JournalDb>,
        client: SdnClient,
        validators: Arc<ValidatorRegistry>,
        signal: Arc<SyncSignal>,
        retry_limit: RetryLimit,
    ) -> Self {
        Self {
            db,
            client,
            validators,
            signal,
            retry_limit,
            exit_after_run: false,
        }
    }

    /// Run a single pass and return, and stop a pending sweep at the first
    /// deferred row. Keeps tests deterministic.
    pub fn exit_after_run(mut self, exit: bool) -> Self {
        self.exit_after_run = exit;
        self
    }

    /// Worker loop: wait for a wake, sync, repeat until `shutdown` is set.
    /// Errors are logged and never end the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(retry_limit = ?self.retry_limit, "Journal sync worker started");

        loop {
            tokio::select! {
                _ = self.signal.wait_and_clear() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.run_once().await {
                error!(error = %e, "Journal sync pass failed");
            }

            if self.exit_after_run {
                break;
            }
        }

        info!("Journal sync worker stopped");
    }

    /// One sync pass: pending rows first, then monitored jobs.
    pub async fn run_once(&self) -> Result<(), JournalError> {
        self.process_pending_rows().await?;
        self.process_monitoring_rows().await
    }

    pub async fn process_pending_rows(&self) -> Result<(), JournalError> {
        let mut deferred = HashSet::new();

        loop {
            debug!("Walking journal for pending rows");
            let Some(mut row) = self.db.claim_oldest_pending()? else {
                debug!("No pending rows to sync");
                break;
            };

            // Every pending row left has already been deferred in this pass
            if deferred.contains(&row.id) {
                self.db.update_state(&mut row, RowState::Pending)?;
                break;
            }

            let valid = match self.validators.validate(&*self.db, &row) {
                Ok(valid) => valid,
                Err(JournalError::UnregisteredType(object_type)) => {
                    error!(row_id = %row.id, %object_type, "No dependency validator for object type, failing row");
                    self.db.update_state(&mut row, RowState::Failed)?;
                    continue;
                }
                Err(e) => {
                    self.db.update_state(&mut row, RowState::Pending)?;
                    return Err(e);
                }
            };

            if !valid {
                info!(
                    row_id = %row.id,
                    operation = %row.operation,
                    object_type = %row.object_type,
                    object_uuid = %row.object_uuid,
                    "Operation is not valid yet, skipping for now"
                );
                self.db.update_state(&mut row, RowState::Pending)?;
                deferred.insert(row.id);
                if self.exit_after_run {
                    break;
                }
                continue;
            }

            info!(
                row_id = %row.id,
                operation = %row.operation,
                object_type = %row.object_type,
                object_uuid = %row.object_uuid,
                "Syncing row"
            );

            match self.sync_row(&mut row).await {
                Ok(()) => {}
                Err(JournalError::Client(e)) if e.is_login() => {
                    self.db.update_state(&mut row, RowState::Pending)?;
                    return Err(e.into());
                }
                Err(JournalError::Client(e)) => {
                    error!(row_id = %row.id, error = %e, "Cannot connect to the SDN controller");
                    self.db.advance_retry_or_fail(&mut row, self.retry_limit)?;
                    // Leave the rest for the next wake
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Send one claimed row and record the outcome.
    async fn sync_row(&self, row: &mut JournalRow) -> Result<(), JournalError> {
        let payload = match row.payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(row_id = %row.id, error = %e, "Stored payload is not valid JSON, failing row");
                self.db.update_state(row, RowState::Failed)?;
                return Ok(());
            }
        };

        let path = resource_path(row);
        let response = self
            .client
            .send_operation(row.operation, &path, Some(&payload))
            .await?;

        if response.is_not_implemented() {
            debug!(row_id = %row.id, "Controller does not track this call, row completed");
            self.db.update_state(row, RowState::Completed)?;
            return Ok(());
        }

        match extract_job_id(&response.body) {
            Some(job_id) => {
                debug!(row_id = %row.id, %job_id, "Controller accepted row, monitoring job");
                self.db.update_job_id(row, &job_id)?;
                self.db.update_state(row, RowState::Monitoring)?;
            }
            None => {
                warn!(
                    row_id = %row.id,
                    object_uuid = %row.object_uuid,
                    status = %response.status,
                    "Controller response carries no job id"
                );
                self.db.advance_retry_or_fail(row, self.retry_limit)?;
            }
        }
        Ok(())
    }

    pub async fn process_monitoring_rows(&self) -> Result<(), JournalError> {
        debug!("Walking journal for monitored jobs");
        let rows = self.db.list_monitoring_oldest_first()?;
        if rows.is_empty() {
            debug!("No monitored jobs to sync");
            return Ok(());
        }

        for mut row in rows {
            let Some(job_id) = row.job_id.clone() else {
                warn!(row_id = %row.id, object_uuid = %row.object_uuid, "Monitored row has no job id");
                continue;
            };

            let response = match self.client.get(job_id.trim_matches('/')).await {
                Ok(response) => response,
                Err(e) if e.is_login() => return Err(e.into()),
                Err(e) => {
                    error!(row_id = %row.id, %job_id, error = %e, "Cannot connect to the SDN controller");
                    self.db.update_state(&mut row, RowState::Pending)?;
                    break;
                }
            };

            match response.json::<JobStatusResponse>() {
                Ok(JobStatusResponse { status: Some(status) }) => match status.as_str() {
                    "Completed" => {
                        info!(row_id = %row.id, %job_id, "Controller job completed");
                        self.db.update_state(&mut row, RowState::Completed)?;
                    }
                    "Pending" | "Running" => {
                        debug!(row_id = %row.id, %job_id, %status, "Job still in progress, continue monitoring");
                    }
                    _ => {
                        error!(row_id = %row.id, %job_id, %status, "Controller job failed");
                        self.db.update_state(&mut row, RowState::Pending)?;
                    }
                },
                Ok(JobStatusResponse { status: None }) => {
                    warn!(row_id = %row.id, %job_id, "Job status response has no Status field");
                    self.db.update_state(&mut row, RowState::Pending)?;
                }
                Err(e) => {
                    warn!(row_id = %row.id, %job_id, error = %e, "Failed to parse job status response");
                    self.db.update_state(&mut row, RowState::Pending)?;
                }
            }
        }

        Ok(())
    }
}

/// Controller path of the resource a row addresses. Creates post to the
/// collection, updates and deletes address the object.
pub fn resource_path(row: &JournalRow) -> String {
    let collection = row.object_type.url_path();
    match row.operation {
        Operation::Create => strings_to_url(&[&collection]),
        Operation::Update | Operation::Delete => strings_to_url(&[&collection, &row.object_uuid]),
    }
}

/// Pull the job handle out of a controller response body.
///
/// Accepts a JSON string, a JSON object with a handle field, or an HTML
/// anchor pointing at the job.
pub fn extract_job_id(body: &str) -> Option<String> {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::String(job_id)) => Some(job_id).filter(|id| !id.is_empty()),
        Ok(serde_json::Value::Object(fields)) => JOB_ID_FIELDS.iter().find_map(|key| {
            fields
                .get(*key)
                .and_then(|v| v.as_str())
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        }),
        Ok(_) => None,
        Err(_) => {
            let pattern = JOB_LINK.get_or_init(|| Regex::new(JOB_LINK_PATTERN)).as_ref().ok()?;
            pattern
                .captures(body)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        }
    }
}
