//! # syncline-db: Database Layer for Syncline
//!
//! Local SQLite storage for a sync node: the change log, pull cursors and
//! the application's entity tables.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Syncline Data Flow                               │
//! │                                                                         │
//! │  Host application write          Sync cycle (syncline-sync)            │
//! │       │                               │                                 │
//! │       ▼                               ▼                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   syncline-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌────────────┐  │   │
//! │  │   │   Database    │    │   Repositories     │  │ Migrations │  │   │
//! │  │   │   (pool.rs)   │    │                    │  │ (embedded) │  │   │
//! │  │   │               │    │ ChangeLogRepository│  │ 001_change │  │   │
//! │  │   │ SqlitePool    │◄───│ SyncCursorRepo     │  │ 002_cursor │  │   │
//! │  │   │               │    │ EntityTable        │  │            │  │   │
//! │  │   └───────────────┘    └────────────────────┘  └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database (WAL)                                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Change log, cursors, entity tables
//!
//! ## Usage
//!
//! ```rust,ignore
//! use syncline_db::{Database, DbConfig, WriteOrigin};
//!
//! let db = Database::new(DbConfig::new("app.db")).await?;
//!
//! // Local write: recorded in the change log in the same transaction
//! db.entity("orders")?.insert(record, WriteOrigin::Local).await?;
//!
//! // What the next push will send
//! let pending = db.change_log().select_actionable("orders").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::change_log::ChangeLogRepository;
pub use repository::cursor::{SyncCursor, SyncCursorRepository};
pub use repository::entity::{ColumnInfo, EntityTable, TableKind, UpsertOutcome, WriteOrigin};
