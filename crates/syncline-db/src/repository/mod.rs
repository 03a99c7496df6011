//! # Repository Module
//!
//! Storage for the sync bookkeeping tables and for synced entity tables.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Database                                                               │
//! │  ├── change_log()      ChangeLogRepository                             │
//! │  │   ├── record_change / track        (change hook)                    │
//! │  │   ├── select_actionable / mark_*   (push engine)                    │
//! │  │   └── sweep / status_counts        (retention, diagnostics)         │
//! │  ├── cursors()         SyncCursorRepository                            │
//! │  │   └── get / advance / reset        (pull engine)                    │
//! │  └── entity(name)      EntityTable                                     │
//! │      └── find / insert / update / delete / upsert (WriteOrigin)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ChangeLogRepository`] - Deduplicated outbox of local mutations
//! - [`SyncCursorRepository`] - Per-type pull cursors
//! - [`EntityTable`] - Schema-driven record storage with change hooks

pub mod change_log;
pub mod cursor;
pub mod entity;

pub use change_log::ChangeLogRepository;
pub use cursor::{SyncCursor, SyncCursorRepository};
pub use entity::{ColumnInfo, EntityTable, TableKind, UpsertOutcome, WriteOrigin};
