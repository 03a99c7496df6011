//! # Change Log Repository
//!
//! Durable, deduplicated record of local mutations awaiting push.
//!
//! ## The Outbox Pattern, Deduplicated
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Change Log Implementation                            │
//! │                                                                         │
//! │  LOCAL WRITE (EntityTable::update, WriteOrigin::Local)                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. UPDATE orders SET ... WHERE id = ?                         │   │
//! │  │                                                                 │   │
//! │  │  2. SAVEPOINT                                                   │   │
//! │  │     existing pending/failed entry for (orders, id)?            │   │
//! │  │       yes → UPDATE action = supersede(old, new), payload = ?   │   │
//! │  │       no  → INSERT status = 'pending', attempts = 0            │   │
//! │  │     (failure here rolls back the savepoint only)               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT                                                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            PUSH ENGINE (next sync cycle)                        │   │
//! │  │                                                                 │   │
//! │  │  select_actionable(type)  pending + failed, oldest first       │   │
//! │  │  mark_syncing(id)         claim, attempts += 1                 │   │
//! │  │  mark_completed(ids)      batch accepted by master             │   │
//! │  │  mark_failed(ids, why)    batch rejected, retried next cycle   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • One pending/failed entry per record (partial unique index)          │
//! │  • create→update collapses to one push; any→delete keeps snapshot      │
//! │  • A failing log write never fails the business write                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DbResult;
use syncline_core::validation::validate_identifier;
use syncline_core::{ChangeAction, ChangeLogEntry, ChangeStatus, StatusCounts};

/// Column list matching `ChangeLogEntry`'s `FromRow` layout.
const ENTRY_COLUMNS: &str = "id, entity_type, entity_id, action, status, attempts, \
     last_attempt_at, error_message, payload, created_at, updated_at";

/// Error message stored on entries recovered from an interrupted cycle.
pub const STALE_SYNCING_MESSAGE: &str = "interrupted sync cycle: entry was left in syncing";

/// Repository for change log operations.
#[derive(Debug, Clone)]
pub struct ChangeLogRepository {
    pool: SqlitePool,
    enabled: bool,
}

impl ChangeLogRepository {
    /// Creates a new ChangeLogRepository.
    ///
    /// When `enabled` is false, [`record_change`](Self::record_change) is a
    /// no-op; every other operation works normally.
    pub fn new(pool: SqlitePool, enabled: bool) -> Self {
        ChangeLogRepository { pool, enabled }
    }

    /// Returns true if new mutations are being recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Records a local mutation.
    ///
    /// Upserts the single actionable entry for `(entity_type, entity_id)`:
    /// inserts a pending entry if there is none, otherwise rewrites the
    /// existing one with the superseding action and the new payload and
    /// puts it back to pending with its error cleared.
    ///
    /// ## Returns
    /// `Ok(None)` when change logging is disabled.
    pub async fn record_change(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: ChangeAction,
        payload: Option<&Value>,
    ) -> DbResult<Option<ChangeLogEntry>> {
        if !self.enabled {
            return Ok(None);
        }

        let mut tx = self.pool.begin().await?;
        let entry = Self::record_change_on(&mut tx, entity_type, entity_id, action, payload).await?;
        tx.commit().await?;

        Ok(Some(entry))
    }

    /// Records a mutation, logging and swallowing any failure.
    ///
    /// This is the entry point for storage layers that call the change hook
    /// after their own commit: a lost log entry is reported, never raised.
    pub async fn track(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: ChangeAction,
        payload: Option<&Value>,
    ) -> Option<ChangeLogEntry> {
        match self
            .record_change(entity_type, entity_id, action, payload)
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    error = %e,
                    entity_type = %entity_type,
                    entity_id = %entity_id,
                    action = %action,
                    "Failed to record change, mutation will not be synced"
                );
                None
            }
        }
    }

    /// Records a mutation on an existing connection or transaction.
    ///
    /// Used by `EntityTable` so the log write shares the business write's
    /// transaction.
    pub(crate) async fn record_change_on(
        conn: &mut SqliteConnection,
        entity_type: &str,
        entity_id: &str,
        action: ChangeAction,
        payload: Option<&Value>,
    ) -> DbResult<ChangeLogEntry> {
        validate_identifier(entity_type)?;

        let now = Utc::now();
        let payload = payload.map(|p| p.to_string());

        let existing = Self::actionable_on(conn, entity_type, entity_id).await?;

        if let Some(existing) = existing {
            let merged = existing.action.supersede(action);

            debug!(
                entity_type = %entity_type,
                entity_id = %entity_id,
                previous = %existing.action,
                incoming = %action,
                stored = %merged,
                "Collapsing change into existing entry"
            );

            sqlx::query(
                r#"
                UPDATE sync_change_log SET
                    action = ?2,
                    payload = ?3,
                    status = 'pending',
                    error_message = NULL,
                    updated_at = ?4
                WHERE id = ?1
                "#,
            )
            .bind(&existing.id)
            .bind(merged)
            .bind(&payload)
            .bind(now)
            .execute(&mut *conn)
            .await?;

            return Self::find_on(conn, &existing.id)
                .await?
                .ok_or_else(|| crate::DbError::not_found("ChangeLogEntry", existing.id));
        }

        debug!(
            entity_type = %entity_type,
            entity_id = %entity_id,
            action = %action,
            "Recording change"
        );

        let entry = ChangeLogEntry {
            id: Uuid::new_v4().to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action,
            status: ChangeStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            error_message: None,
            payload,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO sync_change_log (
                id, entity_type, entity_id, action, status,
                attempts, last_attempt_at, error_message, payload,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(entry.action)
        .bind(entry.status)
        .bind(entry.attempts)
        .bind(entry.last_attempt_at)
        .bind(&entry.error_message)
        .bind(&entry.payload)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(entry)
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// Returns pending and failed entries for an entity type, oldest first.
    pub async fn select_actionable(&self, entity_type: &str) -> DbResult<Vec<ChangeLogEntry>> {
        let sql = format!(
            "SELECT {} FROM sync_change_log \
             WHERE entity_type = ?1 AND status IN ('pending', 'failed') \
             ORDER BY created_at ASC, rowid ASC",
            ENTRY_COLUMNS
        );

        let entries = sqlx::query_as::<_, ChangeLogEntry>(&sql)
            .bind(entity_type)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    /// Returns the actionable entry for one record, if any.
    pub async fn actionable_for(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> DbResult<Option<ChangeLogEntry>> {
        let mut conn = self.pool.acquire().await?;
        Self::actionable_on(&mut conn, entity_type, entity_id).await
    }

    /// Fetches one entry by id.
    pub async fn find(&self, id: &str) -> DbResult<Option<ChangeLogEntry>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_on(&mut conn, id).await
    }

    /// Lists entries in one status, oldest first.
    pub async fn list_by_status(
        &self,
        status: ChangeStatus,
        limit: u32,
    ) -> DbResult<Vec<ChangeLogEntry>> {
        let sql = format!(
            "SELECT {} FROM sync_change_log WHERE status = ?1 \
             ORDER BY created_at ASC, rowid ASC LIMIT ?2",
            ENTRY_COLUMNS
        );

        let entries = sqlx::query_as::<_, ChangeLogEntry>(&sql)
            .bind(status)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    // =========================================================================
    // Status Transitions
    // =========================================================================

    /// Claims an actionable entry for sending.
    ///
    /// `status = syncing`, `attempts += 1`, `last_attempt_at = now`.
    ///
    /// ## Returns
    /// `false` if the entry was no longer pending or failed (someone else
    /// claimed it, or it was swept), in which case nothing changed.
    pub async fn mark_syncing(&self, id: &str) -> DbResult<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE sync_change_log SET
                status = 'syncing',
                attempts = attempts + 1,
                last_attempt_at = ?2,
                updated_at = ?2
            WHERE id = ?1 AND status IN ('pending', 'failed')
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Marks a batch of syncing entries as accepted by the master.
    ///
    /// ## Returns
    /// Number of entries transitioned.
    pub async fn mark_completed(&self, ids: &[String]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut completed = 0;

        for id in ids {
            let result = sqlx::query(
                r#"
                UPDATE sync_change_log SET
                    status = 'completed',
                    error_message = NULL,
                    updated_at = ?2
                WHERE id = ?1 AND status = 'syncing'
                "#,
            )
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            completed += result.rows_affected();
        }

        tx.commit().await?;

        debug!(count = completed, "Marked change log entries completed");
        Ok(completed)
    }

    /// Marks a batch of syncing entries as failed with a reason.
    ///
    /// If a record was mutated again while its entry was syncing, a newer
    /// pending entry already exists for it. The failed entry is then folded
    /// into that newer one (actions collapsed, reason carried over) and
    /// removed, so the record still has a single actionable entry.
    ///
    /// ## Returns
    /// Number of entries transitioned or folded.
    pub async fn mark_failed(&self, ids: &[String], reason: &str) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut failed = 0;

        for id in ids {
            if Self::fail_on(&mut tx, id, reason).await? {
                failed += 1;
            }
        }

        tx.commit().await?;

        debug!(count = failed, reason = %reason, "Marked change log entries failed");
        Ok(failed)
    }

    /// Treats entries stuck in `syncing` as failed.
    ///
    /// An entry stays `syncing` forever if the process died mid-push. Any
    /// entry whose last attempt is older than `older_than` is failed with
    /// [`STALE_SYNCING_MESSAGE`] so the next push re-selects it.
    pub async fn requeue_stale_syncing(&self, older_than: Duration) -> DbResult<u64> {
        let cutoff = Utc::now() - older_than;

        let stale: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM sync_change_log
            WHERE status = 'syncing'
            AND (last_attempt_at IS NULL OR last_attempt_at < ?1)
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        if stale.is_empty() {
            return Ok(0);
        }

        let requeued = self.mark_failed(&stale, STALE_SYNCING_MESSAGE).await?;

        warn!(count = requeued, "Requeued change log entries left in syncing");
        Ok(requeued)
    }

    /// Operator override: puts failed entries back to pending with a clean
    /// slate (attempts and error cleared).
    pub async fn reset_failed(&self, entity_type: Option<&str>) -> DbResult<u64> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE sync_change_log SET
                status = 'pending',
                attempts = 0,
                error_message = NULL,
                updated_at = ?2
            WHERE status = 'failed'
            AND (?1 IS NULL OR entity_type = ?1)
            "#,
        )
        .bind(entity_type)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(
            count = result.rows_affected(),
            entity_type = ?entity_type,
            "Reset failed change log entries"
        );
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Retention & Statistics
    // =========================================================================

    /// Deletes completed entries last updated more than `max_age_days` ago.
    ///
    /// ## Returns
    /// Number of deleted entries.
    pub async fn sweep(&self, max_age_days: u32) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
        self.sweep_before(cutoff).await
    }

    /// Deletes completed entries last updated before `cutoff`.
    ///
    /// Pending, syncing and failed entries are never deleted.
    pub async fn sweep_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_change_log
            WHERE status = 'completed'
            AND updated_at < ?1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        info!(
            deleted = result.rows_affected(),
            cutoff = %cutoff,
            "Swept completed change log entries"
        );
        Ok(result.rows_affected())
    }

    /// Counts entries per status, optionally for one entity type.
    pub async fn status_counts(&self, entity_type: Option<&str>) -> DbResult<StatusCounts> {
        let rows: Vec<(ChangeStatus, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) FROM sync_change_log
            WHERE ?1 IS NULL OR entity_type = ?1
            GROUP BY status
            "#,
        )
        .bind(entity_type)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.add(status, count);
        }

        Ok(counts)
    }

    // =========================================================================
    // Connection-level helpers
    // =========================================================================

    async fn find_on(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<ChangeLogEntry>> {
        let sql = format!("SELECT {} FROM sync_change_log WHERE id = ?1", ENTRY_COLUMNS);

        let entry = sqlx::query_as::<_, ChangeLogEntry>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(entry)
    }

    async fn actionable_on(
        conn: &mut SqliteConnection,
        entity_type: &str,
        entity_id: &str,
    ) -> DbResult<Option<ChangeLogEntry>> {
        let sql = format!(
            "SELECT {} FROM sync_change_log \
             WHERE entity_type = ?1 AND entity_id = ?2 \
             AND status IN ('pending', 'failed') LIMIT 1",
            ENTRY_COLUMNS
        );

        let entry = sqlx::query_as::<_, ChangeLogEntry>(&sql)
            .bind(entity_type)
            .bind(entity_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(entry)
    }

    /// Fails one syncing entry, folding it into a newer actionable sibling
    /// when one exists.
    async fn fail_on(conn: &mut SqliteConnection, id: &str, reason: &str) -> DbResult<bool> {
        let Some(entry) = Self::find_on(conn, id).await? else {
            return Ok(false);
        };

        if entry.status != ChangeStatus::Syncing {
            return Ok(false);
        }

        let now = Utc::now();
        let sibling = Self::actionable_on(conn, &entry.entity_type, &entry.entity_id).await?;

        match sibling {
            Some(sibling) => {
                let merged = entry.action.supersede(sibling.action);

                debug!(
                    entry_id = %entry.id,
                    sibling_id = %sibling.id,
                    stored = %merged,
                    "Folding failed entry into newer pending entry"
                );

                sqlx::query(
                    r#"
                    UPDATE sync_change_log SET
                        action = ?2,
                        attempts = attempts + ?3,
                        error_message = ?4,
                        payload = COALESCE(payload, ?5),
                        updated_at = ?6
                    WHERE id = ?1
                    "#,
                )
                .bind(&sibling.id)
                .bind(merged)
                .bind(entry.attempts)
                .bind(reason)
                .bind(&entry.payload)
                .bind(now)
                .execute(&mut *conn)
                .await?;

                sqlx::query("DELETE FROM sync_change_log WHERE id = ?1")
                    .bind(&entry.id)
                    .execute(&mut *conn)
                    .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE sync_change_log SET
                        status = 'failed',
                        error_message = ?2,
                        updated_at = ?3
                    WHERE id = ?1
                    "#,
                )
                .bind(&entry.id)
                .bind(reason)
                .bind(now)
                .execute(&mut *conn)
                .await?;
            }
        }

        Ok(true)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use serde_json::json;

    async fn setup() -> (Database, ChangeLogRepository) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.change_log();
        (db, repo)
    }

    async fn count_actionable(repo: &ChangeLogRepository, entity_type: &str, id: &str) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_change_log \
             WHERE entity_type = ?1 AND entity_id = ?2 AND status IN ('pending', 'failed')",
        )
        .bind(entity_type)
        .bind(id)
        .fetch_one(&repo.pool)
        .await
        .unwrap()
    }

    async fn set_updated_at(repo: &ChangeLogRepository, id: &str, at: DateTime<Utc>) {
        sqlx::query("UPDATE sync_change_log SET updated_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(at)
            .execute(&repo.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_record_inserts_pending_entry() {
        let (_db, repo) = setup().await;

        let entry = repo
            .record_change("orders", "1", ChangeAction::Create, Some(&json!({"id": 1})))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(entry.status, ChangeStatus::Pending);
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.payload_json(), Some(json!({"id": 1})));
    }

    #[tokio::test]
    async fn test_create_then_update_collapses_to_create_with_latest_payload() {
        let (_db, repo) = setup().await;

        let first = repo
            .record_change("orders", "1", ChangeAction::Create, Some(&json!({"id": 1, "qty": 1})))
            .await
            .unwrap()
            .unwrap();
        let second = repo
            .record_change("orders", "1", ChangeAction::Update, Some(&json!({"id": 1, "qty": 5})))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.action, ChangeAction::Create);
        assert_eq!(second.payload_json(), Some(json!({"id": 1, "qty": 5})));
        assert_eq!(count_actionable(&repo, "orders", "1").await, 1);
    }

    #[tokio::test]
    async fn test_any_then_delete_collapses_to_delete() {
        let (_db, repo) = setup().await;

        repo.record_change("orders", "7", ChangeAction::Update, Some(&json!({"id": 7})))
            .await
            .unwrap();
        let entry = repo
            .record_change("orders", "7", ChangeAction::Delete, Some(&json!({"id": 7, "last": true})))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(entry.action, ChangeAction::Delete);
        assert_eq!(entry.payload_json(), Some(json!({"id": 7, "last": true})));
        assert_eq!(count_actionable(&repo, "orders", "7").await, 1);
    }

    #[tokio::test]
    async fn test_collapse_replaces_payload_even_when_absent() {
        let (_db, repo) = setup().await;

        repo.record_change("orders", "3", ChangeAction::Create, Some(&json!({"id": 3, "qty": 1})))
            .await
            .unwrap();
        let entry = repo
            .record_change("orders", "3", ChangeAction::Update, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(entry.action, ChangeAction::Create);
        assert_eq!(entry.payload, None);

        let selected = repo.select_actionable("orders").await.unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].payload, None);
    }

    #[tokio::test]
    async fn test_mutation_on_failed_entry_reopens_it() {
        let (_db, repo) = setup().await;

        let entry = repo
            .record_change("orders", "1", ChangeAction::Update, None)
            .await
            .unwrap()
            .unwrap();
        assert!(repo.mark_syncing(&entry.id).await.unwrap());
        repo.mark_failed(&[entry.id.clone()], "HTTP 500").await.unwrap();

        let reopened = repo
            .record_change("orders", "1", ChangeAction::Update, Some(&json!({"id": 1})))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reopened.id, entry.id);
        assert_eq!(reopened.status, ChangeStatus::Pending);
        assert_eq!(reopened.error_message, None);
        assert_eq!(reopened.attempts, 1);
    }

    #[tokio::test]
    async fn test_at_most_one_actionable_entry_across_sequences() {
        let (_db, repo) = setup().await;
        let actions = [
            ChangeAction::Create,
            ChangeAction::Update,
            ChangeAction::Update,
            ChangeAction::Delete,
            ChangeAction::Create,
            ChangeAction::Update,
        ];

        for (i, action) in actions.iter().enumerate() {
            let entry = repo
                .record_change("orders", "9", *action, Some(&json!({"id": 9, "v": i})))
                .await
                .unwrap()
                .unwrap();

            // Interleave failed pushes, including a mutation while syncing
            if i % 2 == 1 {
                assert!(repo.mark_syncing(&entry.id).await.unwrap());
                repo.record_change("orders", "9", ChangeAction::Update, None)
                    .await
                    .unwrap();
                repo.mark_failed(&[entry.id], "timeout").await.unwrap();
            }

            assert!(count_actionable(&repo, "orders", "9").await <= 1);
        }

        assert_eq!(count_actionable(&repo, "orders", "9").await, 1);
    }

    #[tokio::test]
    async fn test_failure_while_newer_entry_exists_folds_into_it() {
        let (_db, repo) = setup().await;

        let syncing = repo
            .record_change("orders", "1", ChangeAction::Create, Some(&json!({"id": 1})))
            .await
            .unwrap()
            .unwrap();
        assert!(repo.mark_syncing(&syncing.id).await.unwrap());

        let newer = repo
            .record_change("orders", "1", ChangeAction::Update, Some(&json!({"id": 1, "n": 2})))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(newer.id, syncing.id);

        assert_eq!(repo.mark_failed(&[syncing.id.clone()], "HTTP 503").await.unwrap(), 1);

        assert!(repo.find(&syncing.id).await.unwrap().is_none());
        let folded = repo.find(&newer.id).await.unwrap().unwrap();
        assert_eq!(folded.action, ChangeAction::Create);
        assert_eq!(folded.status, ChangeStatus::Pending);
        assert_eq!(folded.error_message.as_deref(), Some("HTTP 503"));
        assert_eq!(folded.attempts, 1);
        assert_eq!(folded.payload_json(), Some(json!({"id": 1, "n": 2})));
    }

    #[tokio::test]
    async fn test_select_actionable_oldest_first_and_skips_other_states() {
        let (_db, repo) = setup().await;

        let a = repo
            .record_change("orders", "1", ChangeAction::Create, None)
            .await
            .unwrap()
            .unwrap();
        let b = repo
            .record_change("orders", "2", ChangeAction::Create, None)
            .await
            .unwrap()
            .unwrap();
        let c = repo
            .record_change("orders", "3", ChangeAction::Create, None)
            .await
            .unwrap()
            .unwrap();
        repo.record_change("customers", "1", ChangeAction::Create, None)
            .await
            .unwrap();

        // b fails, c completes
        repo.mark_syncing(&b.id).await.unwrap();
        repo.mark_failed(&[b.id.clone()], "boom").await.unwrap();
        repo.mark_syncing(&c.id).await.unwrap();
        repo.mark_completed(&[c.id.clone()]).await.unwrap();

        let selected = repo.select_actionable("orders").await.unwrap();
        let ids: Vec<_> = selected.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert_eq!(selected[1].status, ChangeStatus::Failed);
    }

    #[tokio::test]
    async fn test_mark_syncing_claims_once() {
        let (_db, repo) = setup().await;

        let entry = repo
            .record_change("orders", "1", ChangeAction::Create, None)
            .await
            .unwrap()
            .unwrap();

        assert!(repo.mark_syncing(&entry.id).await.unwrap());
        assert!(!repo.mark_syncing(&entry.id).await.unwrap());

        let claimed = repo.find(&entry.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, ChangeStatus::Syncing);
        assert_eq!(claimed.attempts, 1);
        assert!(claimed.last_attempt_at.is_some());
    }

    #[tokio::test]
    async fn test_completed_clears_error_and_failed_is_reselected() {
        let (_db, repo) = setup().await;

        let entry = repo
            .record_change("orders", "1", ChangeAction::Create, None)
            .await
            .unwrap()
            .unwrap();

        repo.mark_syncing(&entry.id).await.unwrap();
        repo.mark_failed(&[entry.id.clone()], "HTTP 502").await.unwrap();
        let failed = repo.find(&entry.id).await.unwrap().unwrap();
        assert_eq!(failed.status, ChangeStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("HTTP 502"));

        assert_eq!(repo.select_actionable("orders").await.unwrap().len(), 1);
        assert!(repo.mark_syncing(&entry.id).await.unwrap());
        assert_eq!(repo.mark_completed(&[entry.id.clone()]).await.unwrap(), 1);

        let done = repo.find(&entry.id).await.unwrap().unwrap();
        assert_eq!(done.status, ChangeStatus::Completed);
        assert_eq!(done.error_message, None);
        assert_eq!(done.attempts, 2);
        assert!(repo.select_actionable("orders").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_old_completed_entries() {
        let (_db, repo) = setup().await;
        let old = Utc::now() - Duration::days(10);

        let mut completed = Vec::new();
        for i in 0..5 {
            let entry = repo
                .record_change("orders", &i.to_string(), ChangeAction::Create, None)
                .await
                .unwrap()
                .unwrap();
            repo.mark_syncing(&entry.id).await.unwrap();
            repo.mark_completed(&[entry.id.clone()]).await.unwrap();
            completed.push(entry.id);
        }
        for id in &completed[..3] {
            set_updated_at(&repo, id, old).await;
        }

        // Two pending entries, one of them old
        let pending = repo
            .record_change("orders", "p1", ChangeAction::Create, None)
            .await
            .unwrap()
            .unwrap();
        set_updated_at(&repo, &pending.id, old).await;
        repo.record_change("orders", "p2", ChangeAction::Create, None)
            .await
            .unwrap();

        assert_eq!(repo.sweep(7).await.unwrap(), 3);
        assert_eq!(repo.status_counts(None).await.unwrap().total(), 4);
        assert!(repo.find(&pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_requeue_stale_syncing() {
        let (_db, repo) = setup().await;

        let stale = repo
            .record_change("orders", "1", ChangeAction::Create, None)
            .await
            .unwrap()
            .unwrap();
        let fresh = repo
            .record_change("orders", "2", ChangeAction::Create, None)
            .await
            .unwrap()
            .unwrap();
        repo.mark_syncing(&stale.id).await.unwrap();
        repo.mark_syncing(&fresh.id).await.unwrap();

        sqlx::query("UPDATE sync_change_log SET last_attempt_at = ?2 WHERE id = ?1")
            .bind(&stale.id)
            .bind(Utc::now() - Duration::hours(1))
            .execute(&repo.pool)
            .await
            .unwrap();

        assert_eq!(repo.requeue_stale_syncing(Duration::minutes(5)).await.unwrap(), 1);

        let requeued = repo.find(&stale.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, ChangeStatus::Failed);
        assert_eq!(requeued.error_message.as_deref(), Some(STALE_SYNCING_MESSAGE));
        let untouched = repo.find(&fresh.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, ChangeStatus::Syncing);
    }

    #[tokio::test]
    async fn test_reset_failed_by_type() {
        let (_db, repo) = setup().await;

        for entity_type in ["orders", "customers"] {
            let entry = repo
                .record_change(entity_type, "1", ChangeAction::Create, None)
                .await
                .unwrap()
                .unwrap();
            repo.mark_syncing(&entry.id).await.unwrap();
            repo.mark_failed(&[entry.id], "nope").await.unwrap();
        }

        assert_eq!(repo.reset_failed(Some("orders")).await.unwrap(), 1);

        let orders = repo.status_counts(Some("orders")).await.unwrap();
        assert_eq!(orders.pending, 1);
        assert_eq!(orders.failed, 0);
        let all = repo.status_counts(None).await.unwrap();
        assert_eq!(all.failed, 1);

        let reset = repo.actionable_for("orders", "1").await.unwrap().unwrap();
        assert_eq!(reset.attempts, 0);
        assert_eq!(reset.error_message, None);
    }

    #[tokio::test]
    async fn test_disabled_log_records_nothing() {
        let db = Database::new(DbConfig::in_memory().track_changes(false))
            .await
            .unwrap();
        let repo = db.change_log();

        let recorded = repo
            .record_change("orders", "1", ChangeAction::Create, None)
            .await
            .unwrap();

        assert!(recorded.is_none());
        assert_eq!(repo.status_counts(None).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_invalid_entity_type_is_rejected_and_track_swallows_it() {
        let (_db, repo) = setup().await;

        assert!(repo
            .record_change("bad name", "1", ChangeAction::Create, None)
            .await
            .is_err());
        assert!(repo
            .track("bad name", "1", ChangeAction::Create, None)
            .await
            .is_none());
    }
}
