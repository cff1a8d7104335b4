//! Journal row operations
//!
//! Every mutation runs through [`JournalDb::retry_on_conflict`], so a caller
//! either sees the write applied once or gets a storage error.

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{to_micros, JournalRow, ObjectType, Operation, RetryLimit, RowState};
use super::JournalDb;
use crate::error::StoreError;

const ROW_COLUMNS: &str =
    "id, object_type, object_uuid, operation, data, job_id, state, retry_count, created_at, last_retried";

/// Current time at the precision the table stores.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Timestamp (micros) that is `age` before now.
fn cutoff_micros(age: Duration) -> i64 {
    let age = i64::try_from(age.as_micros()).unwrap_or(i64::MAX);
    to_micros(now()).saturating_sub(age)
}

impl JournalDb {
    /// Insert a new PENDING row and return its id.
    pub fn create_pending(
        &self,
        object_type: &ObjectType,
        object_uuid: &str,
        operation: Operation,
        data: &serde_json::Value,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let data = data.to_string();

        self.retry_on_conflict("create_pending", |conn| {
            let created = to_micros(now());
            conn.execute(
                "INSERT INTO journal (id, object_type, object_uuid, operation, data, job_id,
                                      state, retry_count, created_at, last_retried)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, 0, ?7, ?7)",
                params![
                    id.to_string(),
                    object_type.as_str(),
                    object_uuid,
                    operation.as_verb(),
                    data,
                    RowState::Pending.as_str(),
                    created,
                ],
            )?;
            Ok(())
        })?;

        debug!(row_id = %id, %object_type, object_uuid, %operation, "Recorded pending row");
        Ok(id)
    }

    /// Atomically move the PENDING row with the oldest `last_retried` to
    /// PROCESSING and hand it to the caller. Each row goes to one caller only.
    pub fn claim_oldest_pending(&self) -> Result<Option<JournalRow>, StoreError> {
        self.retry_on_conflict("claim_oldest_pending", |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let candidate = tx
                .query_row(
                    &format!(
                        "SELECT {} FROM journal WHERE state = ?1
                         ORDER BY last_retried ASC, created_at ASC, id ASC LIMIT 1",
                        ROW_COLUMNS
                    ),
                    [RowState::Pending.as_str()],
                    JournalRow::from_row,
                )
                .optional()?;

            let Some(mut row) = candidate else {
                return Ok(None);
            };

            let claimed_at = now();
            let updated = tx.execute(
                "UPDATE journal SET state = ?1, last_retried = ?2 WHERE id = ?3 AND state = ?4",
                params![
                    RowState::Processing.as_str(),
                    to_micros(claimed_at),
                    row.id.to_string(),
                    RowState::Pending.as_str(),
                ],
            )?;
            if updated != 1 {
                return Err(StoreError::Conflict(format!("row {} was claimed concurrently", row.id)));
            }
            tx.commit()?;

            row.state = RowState::Processing;
            row.last_retried = claimed_at;
            Ok(Some(row))
        })
    }

    /// Set the row state. Refreshes `last_retried`; safe to repeat.
    pub fn update_state(&self, row: &mut JournalRow, state: RowState) -> Result<(), StoreError> {
        let updated_at = now();
        let id = row.id.to_string();

        let updated = self.retry_on_conflict("update_state", |conn| {
            Ok(conn.execute(
                "UPDATE journal SET state = ?1, last_retried = ?2 WHERE id = ?3",
                params![state.as_str(), to_micros(updated_at), id],
            )?)
        })?;
        if updated == 0 {
            warn!(row_id = %row.id, %state, "State update matched no row");
        }

        row.state = state;
        row.last_retried = updated_at;
        Ok(())
    }

    /// Persist the controller job handle for the row.
    pub fn update_job_id(&self, row: &mut JournalRow, job_id: &str) -> Result<(), StoreError> {
        let updated_at = now();
        let id = row.id.to_string();

        self.retry_on_conflict("update_job_id", |conn| {
            Ok(conn.execute(
                "UPDATE journal SET job_id = ?1, last_retried = ?2 WHERE id = ?3",
                params![job_id, to_micros(updated_at), id],
            )?)
        })?;

        row.job_id = Some(job_id.to_string());
        row.last_retried = updated_at;
        Ok(())
    }

    /// Account for a failed attempt: FAILED once the limit is reached,
    /// otherwise bump `retry_count` and go back to PENDING.
    pub fn advance_retry_or_fail(
        &self,
        row: &mut JournalRow,
        limit: RetryLimit,
    ) -> Result<RowState, StoreError> {
        let id = row.id.to_string();

        let (state, retry_count, updated_at) = self.retry_on_conflict("advance_retry_or_fail", |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let current: Option<i64> = tx
                .query_row("SELECT retry_count FROM journal WHERE id = ?1", [&id], |r| r.get(0))
                .optional()?;
            let current = match current {
                Some(count) => u32::try_from(count)
                    .map_err(|_| StoreError::Corrupt(format!("negative retry_count for row {}", id)))?,
                None => return Err(StoreError::Corrupt(format!("row {} disappeared", id))),
            };

            let updated_at = now();
            let (state, retry_count) = if limit.is_exhausted(current) {
                (RowState::Failed, current)
            } else {
                (RowState::Pending, current.saturating_add(1))
            };

            tx.execute(
                "UPDATE journal SET state = ?1, retry_count = ?2, last_retried = ?3 WHERE id = ?4",
                params![state.as_str(), retry_count, to_micros(updated_at), id],
            )?;
            tx.commit()?;

            Ok((state, retry_count, updated_at))
        })?;

        if state == RowState::Failed {
            warn!(row_id = %row.id, retry_count, "Row exhausted its retries and is marked failed");
        }

        row.state = state;
        row.retry_count = retry_count;
        row.last_retried = updated_at;
        Ok(state)
    }

    /// All MONITORING rows, least recently touched first.
    pub fn list_monitoring_oldest_first(&self) -> Result<Vec<JournalRow>, StoreError> {
        self.with_conn(|conn| {
            query_rows(
                conn,
                &format!(
                    "SELECT {} FROM journal WHERE state = ?1
                     ORDER BY last_retried ASC, created_at ASC, id ASC",
                    ROW_COLUMNS
                ),
                params![RowState::Monitoring.as_str()],
            )
        })
    }

    /// Delete rows in `state` untouched for longer than `age`.
    pub fn delete_by_state_older_than(&self, state: RowState, age: Duration) -> Result<usize, StoreError> {
        let deleted = self.retry_on_conflict("delete_by_state_older_than", |conn| {
            Ok(conn.execute(
                "DELETE FROM journal WHERE state = ?1 AND last_retried < ?2",
                params![state.as_str(), cutoff_micros(age)],
            )?)
        })?;

        debug!(%state, count = deleted, "Deleted aged journal rows");
        Ok(deleted)
    }

    /// Put PROCESSING rows untouched for longer than `max_age` back to PENDING.
    pub fn reset_stale_processing(&self, max_age: Duration) -> Result<usize, StoreError> {
        self.retry_on_conflict("reset_stale_processing", |conn| {
            Ok(conn.execute(
                "UPDATE journal SET state = ?1, last_retried = ?4
                 WHERE state = ?2 AND last_retried < ?3",
                params![
                    RowState::Pending.as_str(),
                    RowState::Processing.as_str(),
                    cutoff_micros(max_age),
                    to_micros(now()),
                ],
            )?)
        })
    }

    /// Is there a PENDING/PROCESSING row for `object_uuid`, optionally
    /// restricted to `operations` (empty = any operation)?
    pub fn has_unresolved_ops(&self, object_uuid: &str, operations: &[Operation]) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT operation FROM journal
                 WHERE object_uuid = ?1 AND state IN ('pending', 'processing')",
            )?;
            let verbs = stmt
                .query_map([object_uuid], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(verbs.iter().any(|verb| {
                operations.is_empty() || operations.iter().any(|op| op.as_verb() == verb)
            }))
        })
    }

    /// Is there a PENDING/PROCESSING DELETE of a `child_type` row whose payload
    /// names `parent_id` under `parent_field`?
    pub fn has_unresolved_child_delete(
        &self,
        child_type: &ObjectType,
        parent_field: &str,
        parent_id: &str,
    ) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT data FROM journal
                 WHERE object_type = ?1 AND operation = ?2 AND state IN ('pending', 'processing')",
            )?;
            let payloads = stmt
                .query_map(params![child_type.as_str(), Operation::Delete.as_verb()], |r| {
                    r.get::<_, String>(0)
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(payloads.iter().any(|data| {
                match serde_json::from_str::<serde_json::Value>(data) {
                    Ok(payload) => payload.get(parent_field).and_then(|v| v.as_str()) == Some(parent_id),
                    // Unparseable snapshot: fall back to a plain reference check
                    Err(_) => data.contains(parent_id),
                }
            }))
        })
    }

    /// Is there an older PENDING/PROCESSING row with the same operation and
    /// object uuid as `row`?
    pub fn has_older_unresolved(&self, row: &JournalRow) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS (
                    SELECT 1 FROM journal
                    WHERE state IN ('pending', 'processing')
                      AND operation = ?1 AND object_uuid = ?2
                      AND created_at < ?3 AND id != ?4)",
                params![
                    row.operation.as_verb(),
                    row.object_uuid,
                    to_micros(row.created_at),
                    row.id.to_string(),
                ],
                |r| r.get(0),
            )?;
            Ok(exists)
        })
    }

    pub fn get_row(&self, id: Uuid) -> Result<Option<JournalRow>, StoreError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM journal WHERE id = ?1", ROW_COLUMNS),
                    [id.to_string()],
                    JournalRow::from_row,
                )
                .optional()?)
        })
    }

    /// All rows in insertion order.
    pub fn list_rows(&self) -> Result<Vec<JournalRow>, StoreError> {
        self.with_conn(|conn| {
            query_rows(
                conn,
                &format!("SELECT {} FROM journal ORDER BY created_at ASC, id ASC", ROW_COLUMNS),
                [],
            )
        })
    }

    pub fn list_by_state(&self, state: RowState) -> Result<Vec<JournalRow>, StoreError> {
        self.with_conn(|conn| {
            query_rows(
                conn,
                &format!(
                    "SELECT {} FROM journal WHERE state = ?1 ORDER BY created_at ASC, id ASC",
                    ROW_COLUMNS
                ),
                [state.as_str()],
            )
        })
    }

    /// Row count per state, every state included.
    pub fn count_by_state(&self) -> Result<Vec<(RowState, u64)>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM journal GROUP BY state")?;
            let counts = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;

            let mut result: Vec<(RowState, u64)> = RowState::ALL.iter().map(|s| (*s, 0)).collect();
            for (state, count) in counts {
                let state: RowState = state.parse()?;
                if let Some(entry) = result.iter_mut().find(|(s, _)| *s == state) {
                    entry.1 = count as u64;
                }
            }
            Ok(result)
        })
    }

    /// Hard-delete a row. Returns whether it existed.
    pub fn delete_row(&self, id: Uuid) -> Result<bool, StoreError> {
        let id = id.to_string();
        let deleted = self.retry_on_conflict("delete_row", |conn| {
            Ok(conn.execute("DELETE FROM journal WHERE id = ?1", [&id])?)
        })?;
        Ok(deleted > 0)
    }

    /// Operator action: give a FAILED row a fresh retry budget.
    pub fn requeue_failed(&self, id: Uuid) -> Result<bool, StoreError> {
        let row_id = id.to_string();
        let updated = self.retry_on_conflict("requeue_failed", |conn| {
            Ok(conn.execute(
                "UPDATE journal SET state = ?1, retry_count = 0, last_retried = ?2
                 WHERE id = ?3 AND state = ?4",
                params![
                    RowState::Pending.as_str(),
                    to_micros(now()),
                    row_id,
                    RowState::Failed.as_str(),
                ],
            )?)
        })?;

        if updated > 0 {
            info!(row_id = %id, "Requeued failed row");
        }
        Ok(updated > 0)
    }
}

fn query_rows<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<JournalRow>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, JournalRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn db() -> JournalDb {
        JournalDb::open_in_memory().unwrap()
    }

    fn update_row(db: &JournalDb) -> Uuid {
        db.create_pending(&ObjectType::network(), "id", Operation::Update, &json!({"test": "data"}))
            .unwrap()
    }

    /// Shift a timestamp column of one row into the past.
    fn backdate(db: &JournalDb, id: Uuid, column: &str, by: Duration) {
        db.with_conn(|conn| {
            conn.execute(
                &format!("UPDATE journal SET {col} = {col} - ?1 WHERE id = ?2", col = column),
                params![by.as_micros() as i64, id.to_string()],
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn set_state(db: &JournalDb, id: Uuid, state: RowState) {
        let mut row = db.get_row(id).unwrap().unwrap();
        db.update_state(&mut row, state).unwrap();
    }

    #[test]
    fn test_create_pending_row() {
        let db = db();
        let id = update_row(&db);

        let row = db.get_row(id).unwrap().unwrap();
        assert_eq!(row.state, RowState::Pending);
        assert_eq!(row.retry_count, 0);
        assert_eq!(row.operation, Operation::Update);
        assert_eq!(row.object_type, ObjectType::network());
        assert_eq!(row.created_at, row.last_retried);
        assert_eq!(row.payload().unwrap(), json!({"test": "data"}));
        assert!(row.job_id.is_none());
    }

    #[test]
    fn test_claim_returns_none_when_no_rows() {
        assert!(db().claim_oldest_pending().unwrap().is_none());
    }

    #[test]
    fn test_claim_ignores_non_pending_rows() {
        for state in [RowState::Processing, RowState::Failed, RowState::Completed, RowState::Monitoring] {
            let db = db();
            let id = update_row(&db);
            set_state(&db, id, state);
            assert!(db.claim_oldest_pending().unwrap().is_none(), "claimed a {} row", state);
        }
    }

    #[test]
    fn test_claim_marks_row_processing() {
        let db = db();
        let id = update_row(&db);

        let row = db.claim_oldest_pending().unwrap().unwrap();
        assert_eq!(row.id, id);
        assert_eq!(row.state, RowState::Processing);
        assert_eq!(db.get_row(id).unwrap().unwrap(), row);
        assert!(db.claim_oldest_pending().unwrap().is_none());
    }

    #[test]
    fn test_claim_takes_least_recently_retried_first() {
        let db = db();
        let older = update_row(&db);
        let _newer = update_row(&db);
        backdate(&db, older, "last_retried", Duration::from_secs(60));

        let row = db.claim_oldest_pending().unwrap().unwrap();
        assert_eq!(row.id, older);
    }

    #[test]
    fn test_monitoring_rows_ordered_oldest_first() {
        let db = db();
        let newer = update_row(&db);
        let older = update_row(&db);
        set_state(&db, newer, RowState::Monitoring);
        set_state(&db, older, RowState::Monitoring);
        backdate(&db, older, "last_retried", Duration::from_secs(60));

        let rows = db.list_monitoring_oldest_first().unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![older, newer]);
    }

    #[test]
    fn test_update_state_transitions() {
        let transitions = [
            (RowState::Processing, RowState::Pending),
            (RowState::Pending, RowState::Processing),
            (RowState::Processing, RowState::Failed),
            (RowState::Processing, RowState::Monitoring),
            (RowState::Processing, RowState::Completed),
        ];
        for (from, to) in transitions {
            let db = db();
            let id = update_row(&db);
            let mut row = db.get_row(id).unwrap().unwrap();
            for state in [from, to] {
                db.update_state(&mut row, state).unwrap();
                assert_eq!(db.get_row(id).unwrap().unwrap().state, state);
            }
        }
    }

    #[test]
    fn test_update_state_keeps_created_at() {
        let db = db();
        let id = update_row(&db);
        backdate(&db, id, "created_at", Duration::from_secs(3600));
        let mut row = db.get_row(id).unwrap().unwrap();
        let created_at = row.created_at;

        db.update_state(&mut row, RowState::Processing).unwrap();
        let stored = db.get_row(id).unwrap().unwrap();
        assert_eq!(stored.created_at, created_at);
        assert!(stored.last_retried > created_at);
    }

    #[test]
    fn test_update_job_id() {
        let db = db();
        let id = update_row(&db);
        let mut row = db.get_row(id).unwrap().unwrap();

        db.update_job_id(&mut row, "job_id").unwrap();
        assert_eq!(db.get_row(id).unwrap().unwrap().job_id.as_deref(), Some("job_id"));
        assert_eq!(row.job_id.as_deref(), Some("job_id"));
    }

    fn retry_case(retry_count: u32, limit: RetryLimit) -> JournalRow {
        let db = db();
        let id = update_row(&db);
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE journal SET retry_count = ?1 WHERE id = ?2",
                params![retry_count, id.to_string()],
            )?;
            Ok(())
        })
        .unwrap();

        let mut row = db.get_row(id).unwrap().unwrap();
        db.advance_retry_or_fail(&mut row, limit).unwrap();
        db.get_row(id).unwrap().unwrap()
    }

    #[test]
    fn test_retry_below_limit_goes_back_to_pending() {
        let row = retry_case(0, RetryLimit::Max(1));
        assert_eq!(row.state, RowState::Pending);
        assert_eq!(row.retry_count, 1);
    }

    #[test]
    fn test_retry_at_limit_fails_row() {
        let row = retry_case(1, RetryLimit::Max(1));
        assert_eq!(row.state, RowState::Failed);
        assert_eq!(row.retry_count, 1);
    }

    #[test]
    fn test_retry_exhaustion_after_limit_plus_one_calls() {
        for max in 0..4u32 {
            let db = db();
            let id = update_row(&db);
            let mut row = db.get_row(id).unwrap().unwrap();

            for _ in 0..max {
                assert_eq!(db.advance_retry_or_fail(&mut row, RetryLimit::Max(max)).unwrap(), RowState::Pending);
            }
            assert_eq!(db.advance_retry_or_fail(&mut row, RetryLimit::Max(max)).unwrap(), RowState::Failed);
            assert_eq!(db.get_row(id).unwrap().unwrap().state, RowState::Failed);
        }
    }

    #[test]
    fn test_unlimited_retries_never_fail() {
        let db = db();
        let id = update_row(&db);
        let mut row = db.get_row(id).unwrap().unwrap();

        for _ in 0..50 {
            db.advance_retry_or_fail(&mut row, RetryLimit::Unlimited).unwrap();
        }
        let row = db.get_row(id).unwrap().unwrap();
        assert_eq!(row.state, RowState::Pending);
        assert_eq!(row.retry_count, 50);
    }

    fn retention_case(age: Duration, retention: Duration, state: RowState) -> usize {
        let db = db();
        let id = update_row(&db);
        set_state(&db, id, state);
        backdate(&db, id, "last_retried", age);

        db.delete_by_state_older_than(RowState::Completed, retention).unwrap();
        db.list_rows().unwrap().len()
    }

    #[test]
    fn test_delete_completed_rows_no_new_rows() {
        assert_eq!(retention_case(Duration::ZERO, Duration::from_secs(10), RowState::Completed), 1);
    }

    #[test]
    fn test_delete_completed_rows_one_old_row() {
        assert_eq!(retention_case(Duration::from_secs(6), Duration::from_secs(5), RowState::Completed), 0);
    }

    #[test]
    fn test_delete_completed_rows_wrong_state() {
        assert_eq!(retention_case(Duration::from_secs(10), Duration::from_secs(8), RowState::Pending), 1);
    }

    #[test]
    fn test_reset_stale_processing() {
        let db = db();
        let stale = update_row(&db);
        let fresh = update_row(&db);
        set_state(&db, stale, RowState::Processing);
        set_state(&db, fresh, RowState::Processing);
        backdate(&db, stale, "last_retried", Duration::from_secs(24 * 3600));

        let before = now();
        assert_eq!(db.reset_stale_processing(Duration::from_secs(100)).unwrap(), 1);
        let recovered = db.get_row(stale).unwrap().unwrap();
        assert_eq!(recovered.state, RowState::Pending);
        assert!(recovered.last_retried >= before);
        assert_eq!(db.get_row(fresh).unwrap().unwrap().state, RowState::Processing);

        // Recovered again only once it has gone stale a second time
        set_state(&db, stale, RowState::Processing);
        assert_eq!(db.reset_stale_processing(Duration::from_secs(100)).unwrap(), 0);
    }

    fn older_ops_case(rows: &[(&str, &str)], hours_ago: &[u64]) -> Vec<bool> {
        let db = db();
        let ids: Vec<_> = rows
            .iter()
            .map(|(object_type, uuid)| {
                db.create_pending(&ObjectType::new(*object_type), uuid, Operation::Update, &json!({}))
                    .unwrap()
            })
            .collect();
        // Align created_at so "same created time" really is the same
        db.with_conn(|conn| {
            conn.execute("UPDATE journal SET created_at = 1000000000", [])?;
            Ok(())
        })
        .unwrap();
        for (id, hours) in ids.iter().zip(hours_ago) {
            backdate(&db, *id, "created_at", Duration::from_secs(hours * 3600));
        }

        ids.iter()
            .map(|id| {
                let row = db.get_row(*id).unwrap().unwrap();
                !db.has_older_unresolved(&row).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_validate_updates_same_object_uuid() {
        let valid = older_ops_case(&[("network", "id"), ("network", "id")], &[1, 0]);
        assert_eq!(valid, vec![true, false]);
    }

    #[test]
    fn test_validate_updates_same_created_time() {
        let valid = older_ops_case(&[("network", "id"), ("network", "id")], &[0, 0]);
        assert_eq!(valid, vec![true, true]);
    }

    #[test]
    fn test_validate_updates_different_object_uuid() {
        let valid = older_ops_case(&[("network", "id"), ("network", "ida")], &[1, 0]);
        assert_eq!(valid, vec![true, true]);
    }

    #[test]
    fn test_validate_updates_different_object_type() {
        let valid = older_ops_case(&[("network", "id"), ("port", "ida")], &[1, 0]);
        assert_eq!(valid, vec![true, true]);
    }

    #[test]
    fn test_older_completed_row_does_not_block() {
        let db = db();
        let first = update_row(&db);
        let second = update_row(&db);
        backdate(&db, first, "created_at", Duration::from_secs(60));
        set_state(&db, first, RowState::Completed);

        let row = db.get_row(second).unwrap().unwrap();
        assert!(!db.has_older_unresolved(&row).unwrap());
    }

    #[test]
    fn test_has_unresolved_ops_filters_by_operation() {
        let db = db();
        db.create_pending(&ObjectType::network(), "net-1", Operation::Create, &json!({}))
            .unwrap();

        assert!(db.has_unresolved_ops("net-1", &[]).unwrap());
        assert!(db.has_unresolved_ops("net-1", &[Operation::Create, Operation::Update]).unwrap());
        assert!(!db.has_unresolved_ops("net-1", &[Operation::Delete]).unwrap());
        assert!(!db.has_unresolved_ops("net-2", &[]).unwrap());
    }

    #[test]
    fn test_has_unresolved_child_delete_matches_parent_field() {
        let db = db();
        db.create_pending(
            &ObjectType::port(),
            "port-1",
            Operation::Delete,
            &json!({"id": "port-1", "network_id": "net-1"}),
        )
        .unwrap();

        assert!(db.has_unresolved_child_delete(&ObjectType::port(), "network_id", "net-1").unwrap());
        assert!(!db.has_unresolved_child_delete(&ObjectType::port(), "network_id", "net-2").unwrap());
        assert!(!db.has_unresolved_child_delete(&ObjectType::network(), "network_id", "net-1").unwrap());
    }

    #[test]
    fn test_count_by_state_and_requeue() {
        let db = db();
        let id = update_row(&db);
        update_row(&db);
        set_state(&db, id, RowState::Failed);

        let counts = db.count_by_state().unwrap();
        assert!(counts.contains(&(RowState::Pending, 1)));
        assert!(counts.contains(&(RowState::Failed, 1)));
        assert!(counts.contains(&(RowState::Completed, 0)));

        assert!(db.requeue_failed(id).unwrap());
        assert!(!db.requeue_failed(id).unwrap());
        let row = db.get_row(id).unwrap().unwrap();
        assert_eq!(row.state, RowState::Pending);
        assert_eq!(row.retry_count, 0);
    }

    #[test]
    fn test_delete_row() {
        let db = db();
        let id = update_row(&db);
        assert!(db.delete_row(id).unwrap());
        assert!(!db.delete_row(id).unwrap());
        assert!(db.list_rows().unwrap().is_empty());
    }
}
