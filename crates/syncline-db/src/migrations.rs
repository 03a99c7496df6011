//! # Database Migrations
//!
//! Embedded SQL migrations for the sync bookkeeping tables.
//!
//! ## What Gets Created
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  001_change_log.sql   sync_change_log + partial unique index           │
//! │                       (one pending/failed entry per record)            │
//! │  002_sync_cursors.sql sync_cursors (entity_type → last merge time)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entity tables are NOT created here: they belong to the application whose
//! data is being synced. The registry skips types whose table is missing.
//!
//! ## Adding New Migrations
//!
//! 1. Create a new file in `migrations/sqlite/` with the next sequence number
//! 2. Write idempotent SQL (use `IF NOT EXISTS` where possible)
//! 3. **NEVER** modify existing migrations - always add new ones

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrations from the workspace `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Tables owned by the sync machinery. Never treated as entity types.
pub const INTERNAL_TABLES: &[&str] = &["sync_change_log", "sync_cursors", "_sqlx_migrations"];

/// Runs all pending database migrations.
///
/// Idempotent: safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns (total_migrations, applied_migrations), for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await?;

    Ok((total, applied as usize))
}

/// Returns true if `table` is one of the sync machinery's own tables.
pub fn is_internal_table(table: &str) -> bool {
    INTERNAL_TABLES.contains(&table) || table.to_ascii_lowercase().starts_with("sqlite_")
}
