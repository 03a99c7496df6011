//! # Sync Cursor Repository
//!
//! Per entity type, the time of the last pull that merged at least one
//! record. The next pull asks the master for records changed since then.
//!
//! Cursors only move forward: advancing to an earlier instant is ignored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

/// A stored pull cursor.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct SyncCursor {
    pub entity_type: String,
    pub cursor_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Repository for pull cursors.
#[derive(Debug, Clone)]
pub struct SyncCursorRepository {
    pool: SqlitePool,
}

impl SyncCursorRepository {
    /// Creates a new SyncCursorRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncCursorRepository { pool }
    }

    /// Gets the cursor for an entity type, if one was ever stored.
    pub async fn get(&self, entity_type: &str) -> DbResult<Option<DateTime<Utc>>> {
        let cursor: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT cursor_at FROM sync_cursors WHERE entity_type = ?1")
                .bind(entity_type)
                .fetch_optional(&self.pool)
                .await?;

        Ok(cursor)
    }

    /// Gets the cursor, falling back to `default_start` for a type that has
    /// never been pulled. The fallback is not persisted.
    pub async fn get_or(
        &self,
        entity_type: &str,
        default_start: DateTime<Utc>,
    ) -> DbResult<DateTime<Utc>> {
        Ok(self.get(entity_type).await?.unwrap_or(default_start))
    }

    /// Moves the cursor forward to `at`.
    ///
    /// ## Returns
    /// `true` if the stored cursor changed.
    pub async fn advance(&self, entity_type: &str, at: DateTime<Utc>) -> DbResult<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO sync_cursors (entity_type, cursor_at, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (entity_type) DO UPDATE SET
                cursor_at = excluded.cursor_at,
                updated_at = excluded.updated_at
            WHERE excluded.cursor_at > sync_cursors.cursor_at
            "#,
        )
        .bind(entity_type)
        .bind(at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let moved = result.rows_affected() > 0;
        debug!(entity_type = %entity_type, cursor = %at, moved, "Advance pull cursor");
        Ok(moved)
    }

    /// Forgets the cursor so the next pull starts from the default date.
    pub async fn reset(&self, entity_type: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM sync_cursors WHERE entity_type = ?1")
            .bind(entity_type)
            .execute(&self.pool)
            .await?;

        info!(entity_type = %entity_type, "Pull cursor reset");
        Ok(result.rows_affected() > 0)
    }

    /// Lists all stored cursors by entity type.
    pub async fn list(&self) -> DbResult<Vec<SyncCursor>> {
        let cursors = sqlx::query_as::<_, SyncCursor>(
            "SELECT entity_type, cursor_at, updated_at FROM sync_cursors ORDER BY entity_type",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(cursors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn test_missing_cursor_uses_default() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cursors = db.cursors();
        let default = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(cursors.get("orders").await.unwrap(), None);
        assert_eq!(cursors.get_or("orders", default).await.unwrap(), default);
    }

    #[tokio::test]
    async fn test_cursor_only_moves_forward() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cursors = db.cursors();
        let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        assert!(cursors.advance("orders", t1).await.unwrap());
        assert!(!cursors.advance("orders", t1 - Duration::hours(1)).await.unwrap());
        assert_eq!(cursors.get("orders").await.unwrap(), Some(t1));

        let t2 = t1 + Duration::minutes(5);
        assert!(cursors.advance("orders", t2).await.unwrap());
        assert_eq!(cursors.get("orders").await.unwrap(), Some(t2));
    }

    #[tokio::test]
    async fn test_reset_and_list() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cursors = db.cursors();
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        cursors.advance("orders", t).await.unwrap();
        cursors.advance("customers", t).await.unwrap();

        let listed: Vec<_> = cursors
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.entity_type)
            .collect();
        assert_eq!(listed, vec!["customers", "orders"]);

        assert!(cursors.reset("orders").await.unwrap());
        assert_eq!(cursors.get("orders").await.unwrap(), None);
    }
}
