//! # Entity Tables
//!
//! Schema-driven storage for synced entity types.
//!
//! Entity types are not known at compile time: each one is an application
//! table keyed by an `id` column. `EntityTable` reads the column list from
//! `PRAGMA table_info`, drops record fields the table doesn't have, and
//! binds the rest by their JSON type.
//!
//! ## Change Hooks
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  insert / update / delete / upsert (origin)                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN                                                                  │
//! │    business statement          ← error here aborts the whole write     │
//! │    origin == Local?                                                     │
//! │      SAVEPOINT                                                          │
//! │        change log upsert       ← error here: ROLLBACK TO SAVEPOINT,    │
//! │      RELEASE                     warn!, write still commits            │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes made by the pull engine use [`WriteOrigin::Sync`] and are never
//! logged, otherwise every pulled record would be pushed straight back.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Row, SqliteConnection, SqlitePool, TypeInfo, ValueRef};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::repository::change_log::ChangeLogRepository;
use syncline_core::validation::{id_to_string, record_id, validate_identifier};
use syncline_core::{timestamp, ChangeAction, Record, ID_FIELD};

/// Column holding a record's creation time, when the table tracks it.
pub const CREATED_AT_COLUMN: &str = "created_at";

/// Column holding a record's last modification time.
pub const UPDATED_AT_COLUMN: &str = "updated_at";

// =============================================================================
// Types
// =============================================================================

/// Who is performing a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteOrigin {
    /// A local application write. Recorded in the change log.
    #[default]
    Local,

    /// A write applied by the pull engine. Never recorded.
    Sync,
}

impl WriteOrigin {
    /// Returns true if writes from this origin are recorded.
    pub fn records_changes(&self) -> bool {
        matches!(self, WriteOrigin::Local)
    }
}

/// What kind of schema object backs an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Table,
    View,
}

/// One column from `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

// =============================================================================
// EntityTable
// =============================================================================

/// Storage handle for one entity type.
#[derive(Debug, Clone)]
pub struct EntityTable {
    pool: SqlitePool,
    table: String,
    change_log: ChangeLogRepository,
}

impl EntityTable {
    /// Creates a handle for `table`.
    ///
    /// ## Errors
    /// `DbError::Invalid` if `table` is not a plain identifier.
    pub fn new(pool: SqlitePool, table: &str, change_log: ChangeLogRepository) -> DbResult<Self> {
        validate_identifier(table)?;

        Ok(EntityTable {
            pool,
            table: table.to_string(),
            change_log,
        })
    }

    /// The entity type name (same as the table name).
    pub fn name(&self) -> &str {
        &self.table
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Returns what backs this entity type, or `None` if nothing does.
    pub async fn kind(&self) -> DbResult<Option<TableKind>> {
        let kind: Option<String> =
            sqlx::query_scalar("SELECT type FROM sqlite_master WHERE name = ?1 AND type IN ('table', 'view')")
                .bind(&self.table)
                .fetch_optional(&self.pool)
                .await?;

        Ok(kind.map(|k| match k.as_str() {
            "view" => TableKind::View,
            _ => TableKind::Table,
        }))
    }

    /// Returns true if a table or view with this name exists.
    pub async fn exists(&self) -> DbResult<bool> {
        Ok(self.kind().await?.is_some())
    }

    /// Returns true if records can be written (a real table, not a view).
    pub async fn is_writable(&self) -> DbResult<bool> {
        Ok(self.kind().await? == Some(TableKind::Table))
    }

    /// Lists the table's columns in declaration order.
    pub async fn columns(&self) -> DbResult<Vec<ColumnInfo>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(&self.table));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        if rows.is_empty() {
            return Err(DbError::TableMissing(self.table.clone()));
        }

        rows.iter()
            .map(|row| -> DbResult<ColumnInfo> {
                Ok(ColumnInfo {
                    name: row.try_get("name")?,
                    declared_type: row.try_get("type")?,
                    not_null: row.try_get::<i64, _>("notnull")? != 0,
                    primary_key: row.try_get::<i64, _>("pk")? != 0,
                })
            })
            .collect()
    }

    /// Returns true if the table has both `created_at` and `updated_at`.
    pub async fn has_timestamps(&self) -> DbResult<bool> {
        let columns = self.column_names().await?;
        Ok(has_timestamp_columns(&columns))
    }

    async fn column_names(&self) -> DbResult<Vec<String>> {
        Ok(self.columns().await?.into_iter().map(|c| c.name).collect())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetches one record by id.
    ///
    /// The id is bound as text; SQLite's column affinity makes this match
    /// integer keys as well.
    pub async fn find(&self, id: &str) -> DbResult<Option<Record>> {
        let mut conn = self.pool.acquire().await?;
        self.find_on(&mut conn, &Value::String(id.to_string())).await
    }

    /// Returns true if a record with this id exists.
    pub async fn exists_record(&self, id: &str) -> DbResult<bool> {
        Ok(self.find(id).await?.is_some())
    }

    /// Lists records whose columns equal every value in `filter`.
    ///
    /// Filter keys that are not columns of the table are ignored. An empty
    /// filter lists everything.
    pub async fn list(&self, filter: &Record) -> DbResult<Vec<Record>> {
        let columns = self.column_names().await?;
        let filter = filter_to_columns(filter.clone(), &columns, &self.table);

        let mut sql = format!("SELECT * FROM {}", quote_ident(&self.table));
        if !filter.is_empty() {
            let conditions: Vec<String> = filter
                .iter()
                .enumerate()
                .map(|(i, (k, v))| {
                    if v.is_null() {
                        format!("{} IS ?{}", quote_ident(k), i + 1)
                    } else {
                        format!("{} = ?{}", quote_ident(k), i + 1)
                    }
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        let mut query = sqlx::query(&sql);
        for value in filter.values() {
            query = bind_value(query, value);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    /// Lists records changed after `since`.
    ///
    /// A record's change time is its `updated_at`, falling back to
    /// `created_at`. Records with neither are always included, as are all
    /// records when `since` is `None`.
    pub async fn list_changed_since(&self, since: Option<DateTime<Utc>>) -> DbResult<Vec<Record>> {
        let sql = format!("SELECT * FROM {}", quote_ident(&self.table));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = row_to_record(row)?;
            let changed = match (since, timestamp::effective(&record)) {
                (Some(since), Some(at)) => at > since,
                _ => true,
            };
            if changed {
                records.push(record);
            }
        }

        Ok(records)
    }

    /// Counts all records.
    pub async fn count(&self) -> DbResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&self.table));
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts a record.
    ///
    /// Fields without a matching column are dropped. A missing `id` is left
    /// to SQLite (rowid alias). Local writes get `created_at`/`updated_at`
    /// stamped if the table has them and the record doesn't set them.
    ///
    /// ## Returns
    /// The stored row.
    pub async fn insert(&self, record: Record, origin: WriteOrigin) -> DbResult<Record> {
        let columns = self.column_names().await?;
        let mut record = filter_to_columns(record, &columns, &self.table);
        if origin.records_changes() && has_timestamp_columns(&columns) {
            stamp_missing(&mut record, CREATED_AT_COLUMN);
            stamp_missing(&mut record, UPDATED_AT_COLUMN);
        }

        let mut tx = self.pool.begin().await?;

        let stored = self.insert_on(&mut tx, &record).await?;
        let id = stored_id(&stored)?;

        if origin.records_changes() {
            self.record_in_savepoint(&mut tx, &id, ChangeAction::Create, &stored)
                .await;
        }

        tx.commit().await?;

        debug!(entity_type = %self.table, id = %id, origin = ?origin, "Inserted record");
        Ok(stored)
    }

    /// Updates fields of an existing record.
    ///
    /// ## Errors
    /// `DbError::NotFound` if no record has this id.
    pub async fn update(&self, id: &str, changes: Record, origin: WriteOrigin) -> DbResult<Record> {
        let columns = self.column_names().await?;
        let mut changes = filter_to_columns(changes, &columns, &self.table);
        changes.remove(ID_FIELD);
        if origin.records_changes() && has_timestamp_columns(&columns) {
            stamp_missing(&mut changes, UPDATED_AT_COLUMN);
        }

        let id_value = Value::String(id.to_string());
        let mut tx = self.pool.begin().await?;

        let updated = self.update_on(&mut tx, &id_value, &changes).await?;
        if !updated {
            return Err(DbError::not_found(self.table.clone(), id));
        }

        let stored = self
            .find_on(&mut tx, &id_value)
            .await?
            .ok_or_else(|| DbError::not_found(self.table.clone(), id))?;

        if origin.records_changes() {
            self.record_in_savepoint(&mut tx, id, ChangeAction::Update, &stored)
                .await;
        }

        tx.commit().await?;

        debug!(entity_type = %self.table, id = %id, origin = ?origin, "Updated record");
        Ok(stored)
    }

    /// Deletes a record.
    ///
    /// ## Returns
    /// The deleted row, or `None` if there was nothing to delete. Local
    /// deletes store that row as the change log snapshot.
    pub async fn delete(&self, id: &str, origin: WriteOrigin) -> DbResult<Option<Record>> {
        let id_value = Value::String(id.to_string());
        let mut tx = self.pool.begin().await?;

        let Some(snapshot) = self.find_on(&mut tx, &id_value).await? else {
            return Ok(None);
        };

        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_ident(&self.table),
            quote_ident(ID_FIELD)
        );
        sqlx::query(&sql).bind(id).execute(&mut *tx).await?;

        if origin.records_changes() {
            self.record_in_savepoint(&mut tx, id, ChangeAction::Delete, &snapshot)
                .await;
        }

        tx.commit().await?;

        debug!(entity_type = %self.table, id = %id, origin = ?origin, "Deleted record");
        Ok(Some(snapshot))
    }

    /// Inserts the record, or updates the existing row with the same id.
    ///
    /// ## Errors
    /// `DbError::Invalid` if the record has no usable `id`.
    pub async fn upsert(&self, record: Record, origin: WriteOrigin) -> DbResult<UpsertOutcome> {
        let id = record_id(&record)?;
        let id_value = record.get(ID_FIELD).cloned().unwrap_or(Value::Null);

        let columns = self.column_names().await?;
        let mut record = filter_to_columns(record, &columns, &self.table);
        let stamps = origin.records_changes() && has_timestamp_columns(&columns);

        let mut tx = self.pool.begin().await?;

        let exists = self.find_on(&mut tx, &id_value).await?.is_some();

        let (outcome, action) = if exists {
            record.remove(ID_FIELD);
            if stamps {
                stamp_missing(&mut record, UPDATED_AT_COLUMN);
            }
            self.update_on(&mut tx, &id_value, &record).await?;
            (UpsertOutcome::Updated, ChangeAction::Update)
        } else {
            if stamps {
                stamp_missing(&mut record, CREATED_AT_COLUMN);
                stamp_missing(&mut record, UPDATED_AT_COLUMN);
            }
            self.insert_on(&mut tx, &record).await?;
            (UpsertOutcome::Inserted, ChangeAction::Create)
        };

        if origin.records_changes() {
            if let Some(stored) = self.find_on(&mut tx, &id_value).await? {
                self.record_in_savepoint(&mut tx, &id, action, &stored).await;
            }
        }

        tx.commit().await?;

        debug!(
            entity_type = %self.table,
            id = %id,
            outcome = ?outcome,
            origin = ?origin,
            "Upserted record"
        );
        Ok(outcome)
    }

    // =========================================================================
    // Connection-level helpers
    // =========================================================================

    async fn find_on(&self, conn: &mut SqliteConnection, id: &Value) -> DbResult<Option<Record>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1",
            quote_ident(&self.table),
            quote_ident(ID_FIELD)
        );

        let row = bind_value(sqlx::query(&sql), id)
            .fetch_optional(&mut *conn)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn insert_on(&self, conn: &mut SqliteConnection, record: &Record) -> DbResult<Record> {
        let sql = if record.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&self.table))
        } else {
            let names: Vec<String> = record.keys().map(|k| quote_ident(k)).collect();
            let params: Vec<String> = (1..=record.len()).map(|i| format!("?{}", i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&self.table),
                names.join(", "),
                params.join(", ")
            )
        };

        let mut query = sqlx::query(&sql);
        for value in record.values() {
            query = bind_value(query, value);
        }
        let result = query.execute(&mut *conn).await?;

        let select = format!("SELECT * FROM {} WHERE rowid = ?1", quote_ident(&self.table));
        let row = sqlx::query(&select)
            .bind(result.last_insert_rowid())
            .fetch_one(&mut *conn)
            .await?;

        row_to_record(&row)
    }

    /// Returns false if no row matched.
    async fn update_on(
        &self,
        conn: &mut SqliteConnection,
        id: &Value,
        changes: &Record,
    ) -> DbResult<bool> {
        if changes.is_empty() {
            return Ok(self.find_on(conn, id).await?.is_some());
        }

        let assignments: Vec<String> = changes
            .keys()
            .enumerate()
            .map(|(i, k)| format!("{} = ?{}", quote_ident(k), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            quote_ident(&self.table),
            assignments.join(", "),
            quote_ident(ID_FIELD),
            changes.len() + 1
        );

        let mut query = sqlx::query(&sql);
        for value in changes.values() {
            query = bind_value(query, value);
        }
        let result = bind_value(query, id).execute(&mut *conn).await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records the change under a savepoint. Failures are logged and
    /// rolled back without touching the enclosing business write.
    async fn record_in_savepoint(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        action: ChangeAction,
        snapshot: &Record,
    ) {
        if !self.change_log.is_enabled() {
            return;
        }

        let mut savepoint = match conn.begin().await {
            Ok(savepoint) => savepoint,
            Err(e) => {
                warn!(error = %e, entity_type = %self.table, id = %id, "Could not open savepoint for change log");
                return;
            }
        };

        let payload = Value::Object(snapshot.clone());
        let recorded =
            ChangeLogRepository::record_change_on(&mut savepoint, &self.table, id, action, Some(&payload))
                .await;

        match recorded {
            Ok(_) => {
                if let Err(e) = savepoint.commit().await {
                    warn!(error = %e, entity_type = %self.table, id = %id, "Failed to release change log savepoint");
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    entity_type = %self.table,
                    id = %id,
                    action = %action,
                    "Failed to record change, mutation will not be synced"
                );
                if let Err(e) = savepoint.rollback().await {
                    warn!(error = %e, "Failed to roll back change log savepoint");
                }
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Quotes an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn has_timestamp_columns(columns: &[String]) -> bool {
    columns.iter().any(|c| c == CREATED_AT_COLUMN) && columns.iter().any(|c| c == UPDATED_AT_COLUMN)
}

fn filter_to_columns(record: Record, columns: &[String], table: &str) -> Record {
    let mut dropped = Vec::new();
    let filtered = record
        .into_iter()
        .filter(|(key, _)| {
            let known = columns.iter().any(|c| c == key);
            if !known {
                dropped.push(key.clone());
            }
            known
        })
        .collect();

    if !dropped.is_empty() {
        debug!(entity_type = %table, fields = ?dropped, "Dropped fields with no matching column");
    }
    filtered
}

fn stamp_missing(record: &mut Record, field: &str) {
    if record.get(field).map_or(true, Value::is_null) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        record.insert(field.to_string(), Value::String(now));
    }
}

fn stored_id(record: &Record) -> DbResult<String> {
    record
        .get(ID_FIELD)
        .and_then(id_to_string)
        .ok_or_else(|| {
            DbError::Invalid(syncline_core::CoreError::MissingRecordId {
                field: ID_FIELD.to_string(),
            })
        })
}

/// Binds a JSON value by its type. Arrays and objects are stored as JSON text.
fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

/// Decodes a row by the storage class of each value.
fn row_to_record(row: &SqliteRow) -> DbResult<Record> {
    let mut record = Record::new();

    for column in row.columns() {
        let i = column.ordinal();
        let raw = row.try_get_raw(i)?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_string();
            match storage.as_str() {
                "INTEGER" => Value::from(row.try_get_unchecked::<i64, _>(i)?),
                "REAL" => Value::from(row.try_get_unchecked::<f64, _>(i)?),
                "BLOB" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(i)?;
                    Value::String(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => Value::String(row.try_get_unchecked::<String, _>(i)?),
            }
        };

        record.insert(column.name().to_string(), value);
    }

    Ok(record)
}

// =============================================================================
// Tests
// =============================================================================
