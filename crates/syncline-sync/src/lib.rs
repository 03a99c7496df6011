//! # syncline-sync: Sync Engine for Syncline
//!
//! This crate runs sync cycles between a slave node and its master: it
//! merges the master's records into local tables and sends local changes
//! recorded in the change log back out.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Cycle Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                SyncOrchestrator (one cycle per call)             │  │
//! │  │                                                                  │  │
//! │  │  Invoked by the sync-cycle binary on a scheduler interval       │  │
//! │  │  probe → discover → pull all → requeue stale → push all         │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Probe          │  │ EntityRegistry │  │  MasterClient          │    │
//! │  │                │  │                │  │                        │    │
//! │  │ TCP connect to │  │ User tables or │  │ GET pull/{entity}      │    │
//! │  │ well-known     │  │ static list,   │  │ POST push/{entity}     │    │
//! │  │ endpoints      │  │ minus denylist │  │ retry + backoff (pull) │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  ┌────────────────────────────┐  ┌────────────────────────────────┐    │
//! │  │        PullEngine          │  │          PushEngine            │    │
//! │  │                            │  │                                │    │
//! │  │ skip rule vs. cursor       │  │ pending + failed entries       │    │
//! │  │ upsert (never logged)      │  │ current row or delete snapshot │    │
//! │  │ cursor → cycle start       │  │ batch ack → completed/failed   │    │
//! │  └────────────────────────────┘  └────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`orchestrator`] - Main `SyncOrchestrator`
//! - [`config`] - Sync configuration (role, master URL, probe, retention)
//! - [`error`] - Sync error types
//! - [`probe`] - Connectivity gate
//! - [`registry`] - Entity type discovery
//! - [`pull`] - Remote → local merge
//! - [`push`] - Change log → master
//! - [`report`] - Per-phase and per-entity cycle results
//! - [`transport`] - HTTP client for the master
//!
//! ## Usage
//!
//! ```rust,ignore
//! use syncline_db::{Database, DbConfig};
//! use syncline_sync::{SyncConfig, SyncOrchestrator};
//!
//! let config = SyncConfig::load(None)?;
//! let db = Database::new(DbConfig::new(&config.database.path)).await?;
//!
//! let sync = SyncOrchestrator::new(config, db)?;
//! if let Some(report) = sync.run_scheduled_cycle().await {
//!     for failed in report.push.failed_entities() {
//!         println!("{}: {:?}", failed.entity_type, failed.error);
//!     }
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod probe;
pub mod pull;
pub mod push;
pub mod registry;
pub mod report;
pub mod transport;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{SyncConfig, SyncRole};
pub use error::{SyncError, SyncResult};
pub use orchestrator::SyncOrchestrator;
pub use probe::ConnectivityProbe;
pub use pull::{PullEngine, PullStats};
pub use push::{PushEngine, PushStats};
pub use registry::{EntityDescriptor, EntityRegistry};
pub use report::{CycleReport, EntityOutcome, PhaseResult};
pub use transport::{MasterClient, TransportConfig};
