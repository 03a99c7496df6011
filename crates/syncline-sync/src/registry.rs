//! # Entity Registry
//!
//! Decides which entity types take part in a cycle.
//!
//! ## Discovery
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  candidates                                                            │
//! │    entities.include set?  → that list, in order                        │
//! │    otherwise              → every user table in the database           │
//! │       │                                                                 │
//! │       ▼  per candidate                                                  │
//! │    denylisted?                    → skip (debug)                        │
//! │    internal sync table?           → skip (debug)                        │
//! │    not a valid identifier?        → skip (warn)                         │
//! │    no backing table?              → skip (warn)                         │
//! │    a view, not a table?           → skip (warn)                         │
//! │    column named action/sync_log_id? → skip (warn)                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │    EntityDescriptor { entity_type, table, has_timestamps }             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Discovery runs every cycle, so a table created by the host application
//! is picked up without a restart. If the database cannot be read at all
//! the registry reports no entity types and the cycle does nothing.

use tracing::{debug, info, warn};

use crate::config::EntitySettings;
use syncline_core::{ACTION_FIELD, SYNC_LOG_ID_FIELD};
use syncline_db::migrations::is_internal_table;
use syncline_db::repository::entity::{CREATED_AT_COLUMN, UPDATED_AT_COLUMN};
use syncline_db::{Database, EntityTable, TableKind};

/// Fields the push engine adds to every outbound record. A table with a
/// column of the same name cannot be synced without losing data.
const RESERVED_COLUMNS: [&str; 2] = [ACTION_FIELD, SYNC_LOG_ID_FIELD];

/// A syncable entity type and its storage handle.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub entity_type: String,
    pub table: EntityTable,

    /// Both `created_at` and `updated_at` exist, so the pull skip rule
    /// applies to this type.
    pub has_timestamps: bool,
}

/// Enumerates syncable entity types.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    db: Database,
    include: Vec<String>,
    deny: Vec<String>,
}

impl EntityRegistry {
    pub fn new(db: Database, settings: &EntitySettings) -> Self {
        EntityRegistry {
            db,
            include: settings.include.clone(),
            deny: settings.deny.clone(),
        }
    }

    /// Returns true if `entity_type` is on the denylist.
    pub fn is_denied(&self, entity_type: &str) -> bool {
        self.deny.iter().any(|d| d.eq_ignore_ascii_case(entity_type))
    }

    /// Discovers usable entity types, in discovery order.
    ///
    /// Never fails: unusable candidates are skipped with a warning, and an
    /// unreadable database yields an empty list.
    pub async fn discover(&self) -> Vec<EntityDescriptor> {
        let candidates = match self.candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "Entity discovery failed, no entity types this cycle");
                return Vec::new();
            }
        };

        let mut descriptors: Vec<EntityDescriptor> = Vec::with_capacity(candidates.len());

        for name in candidates {
            if descriptors.iter().any(|d| d.entity_type == name) {
                continue;
            }
            if let Some(descriptor) = self.admit(&name).await {
                descriptors.push(descriptor);
            }
        }

        info!(
            count = descriptors.len(),
            entity_types = ?descriptors.iter().map(|d| d.entity_type.as_str()).collect::<Vec<_>>(),
            "Discovered entity types"
        );

        descriptors
    }

    async fn candidates(&self) -> syncline_db::DbResult<Vec<String>> {
        if !self.include.is_empty() {
            return Ok(self.include.clone());
        }
        self.db.list_user_tables().await
    }

    /// Runs the checks for one candidate.
    async fn admit(&self, name: &str) -> Option<EntityDescriptor> {
        if self.is_denied(name) {
            debug!(entity_type = %name, "Skipping denylisted entity type");
            return None;
        }

        if is_internal_table(name) {
            debug!(entity_type = %name, "Skipping sync bookkeeping table");
            return None;
        }

        let table = match self.db.entity(name) {
            Ok(table) => table,
            Err(e) => {
                warn!(entity_type = %name, error = %e, "Skipping entity type with invalid name");
                return None;
            }
        };

        match table.kind().await {
            Ok(Some(TableKind::Table)) => {}
            Ok(Some(TableKind::View)) => {
                warn!(entity_type = %name, "Skipping entity type backed by a view");
                return None;
            }
            Ok(None) => {
                warn!(entity_type = %name, "Skipping entity type without a backing table");
                return None;
            }
            Err(e) => {
                warn!(entity_type = %name, error = %e, "Skipping entity type, existence check failed");
                return None;
            }
        }

        let columns = match table.columns().await {
            Ok(columns) => columns,
            Err(e) => {
                warn!(entity_type = %name, error = %e, "Skipping entity type, could not read columns");
                return None;
            }
        };

        if let Some(clash) = columns
            .iter()
            .find(|c| RESERVED_COLUMNS.iter().any(|r| c.name.eq_ignore_ascii_case(r)))
        {
            warn!(
                entity_type = %name,
                column = %clash.name,
                "Skipping entity type, column name is reserved for outbound records"
            );
            return None;
        }

        let has_timestamp = |n: &str| columns.iter().any(|c| c.name == n);
        let has_timestamps = has_timestamp(CREATED_AT_COLUMN) && has_timestamp(UPDATED_AT_COLUMN);

        Some(EntityDescriptor {
            entity_type: name.to_string(),
            table,
            has_timestamps,
        })
    }
}
