//! # syncline-core: Pure Change-Tracking Rules
//!
//! This crate holds the rules every other layer agrees on, as pure
//! functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Syncline Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 syncline-sync (network side)                    │   │
//! │  │   probe ──► registry ──► pull engine ──► push engine            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                syncline-db (SQLite storage)                     │   │
//! │  │   change log, cursors, entity tables with change hooks          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ syncline-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │   types   │  │ timestamp │  │ validation│                  │   │
//! │  │   │  actions  │  │  lenient  │  │ idents,   │                  │   │
//! │  │   │  statuses │  │  parsing  │  │ record ids│                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Change actions, statuses, log entries, status counts
//! - [`timestamp`] - Lenient-then-strict timestamp parsing that never fails
//! - [`validation`] - SQL identifier and record id checks
//! - [`error`] - Domain error types

pub mod error;
pub mod timestamp;
pub mod types;
pub mod validation;

pub use error::CoreError;
pub use types::*;

/// A record as exchanged with the master and stored locally: a JSON object.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Name of the primary identifier field on every synced record.
pub const ID_FIELD: &str = "id";

/// Field carrying the change action on outbound records.
pub const ACTION_FIELD: &str = "action";

/// Field correlating an outbound record back to its change-log entry.
pub const SYNC_LOG_ID_FIELD: &str = "sync_log_id";
