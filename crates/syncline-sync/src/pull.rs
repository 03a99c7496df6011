//! # Pull Engine
//!
//! Merges the master's records into local storage.
//!
//! ## Merge Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  for each remote record (entity type E, cursor C):                     │
//! │                                                                         │
//! │    not an object / no id         → rejected, siblings continue         │
//! │                                                                         │
//! │    E has created_at+updated_at?                                        │
//! │      ts = updated_at ?? created_at   (unparseable → absent)            │
//! │      ts present and ts <= C        → skipped (already applied, or a    │
//! │                                      tie: local state wins)            │
//! │                                                                         │
//! │    upsert by id, WriteOrigin::Sync → applied (never change-logged)     │
//! │                                                                         │
//! │  applied > 0  → cursor(E) = cycle start time                           │
//! │  applied == 0 → cursor untouched                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cursor moves to when the cycle *started*, not to the newest record's
//! timestamp, so records committed on the master while the cycle was
//! running are fetched again next time rather than lost to clock skew.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::SyncResult;
use crate::registry::EntityDescriptor;
use crate::report::{EntityOutcome, PhaseResult};
use crate::transport::MasterClient;
use syncline_core::timestamp;
use syncline_core::validation::record_id;
use syncline_db::{SyncCursorRepository, WriteOrigin};

/// Per-entity pull counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullStats {
    pub fetched: usize,
    pub applied: usize,
    pub skipped: usize,
    pub rejected: usize,
}

/// What happened to one remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Merge {
    Applied,
    Skipped,
    Rejected,
}

/// Fetches and merges remote changes.
#[derive(Debug, Clone)]
pub struct PullEngine {
    client: MasterClient,
    cursors: SyncCursorRepository,
    default_start: DateTime<Utc>,
}

impl PullEngine {
    pub fn new(
        client: MasterClient,
        cursors: SyncCursorRepository,
        default_start: DateTime<Utc>,
    ) -> Self {
        PullEngine {
            client,
            cursors,
            default_start,
        }
    }

    /// Pulls every entity type. One type's failure never stops the others.
    pub async fn pull_all(
        &self,
        entities: &[EntityDescriptor],
        cycle_start: DateTime<Utc>,
    ) -> PhaseResult {
        let mut outcomes = Vec::with_capacity(entities.len());

        for entity in entities {
            let outcome = match self.pull_entity(entity, cycle_start).await {
                Ok(stats) => {
                    info!(
                        entity_type = %entity.entity_type,
                        fetched = stats.fetched,
                        applied = stats.applied,
                        skipped = stats.skipped,
                        rejected = stats.rejected,
                        "Pull complete"
                    );
                    EntityOutcome::ok(&entity.entity_type, stats.applied, stats.skipped, stats.rejected)
                }
                Err(e) => {
                    warn!(entity_type = %entity.entity_type, error = %e, "Pull failed");
                    EntityOutcome::failed(&entity.entity_type, e)
                }
            };
            outcomes.push(outcome);
        }

        PhaseResult::from_outcomes("Pulled", outcomes)
    }

    /// Pulls one entity type.
    pub async fn pull_entity(
        &self,
        entity: &EntityDescriptor,
        cycle_start: DateTime<Utc>,
    ) -> SyncResult<PullStats> {
        let cursor = self
            .cursors
            .get_or(&entity.entity_type, self.default_start)
            .await?;

        let records = self.client.pull(&entity.entity_type, cursor).await?;

        let mut stats = PullStats {
            fetched: records.len(),
            ..Default::default()
        };

        for record in records {
            match self.merge(entity, record, cursor).await {
                Merge::Applied => stats.applied += 1,
                Merge::Skipped => stats.skipped += 1,
                Merge::Rejected => stats.rejected += 1,
            }
        }

        if stats.applied > 0 {
            self.cursors.advance(&entity.entity_type, cycle_start).await?;
        }

        Ok(stats)
    }

    async fn merge(&self, entity: &EntityDescriptor, record: Value, cursor: DateTime<Utc>) -> Merge {
        let Value::Object(record) = record else {
            warn!(entity_type = %entity.entity_type, "Rejecting remote record that is not an object");
            return Merge::Rejected;
        };

        let id = match record_id(&record) {
            Ok(id) => id,
            Err(e) => {
                warn!(entity_type = %entity.entity_type, error = %e, "Rejecting remote record");
                return Merge::Rejected;
            }
        };

        if entity.has_timestamps {
            if let Some(changed_at) = timestamp::effective(&record) {
                if changed_at <= cursor {
                    debug!(
                        entity_type = %entity.entity_type,
                        entity_id = %id,
                        changed_at = %changed_at,
                        cursor = %cursor,
                        "Skipping remote record not newer than cursor"
                    );
                    return Merge::Skipped;
                }
            }
        }

        match entity.table.upsert(record, WriteOrigin::Sync).await {
            Ok(outcome) => {
                debug!(
                    entity_type = %entity.entity_type,
                    entity_id = %id,
                    outcome = ?outcome,
                    "Applied remote record"
                );
                Merge::Applied
            }
            Err(e) => {
                warn!(
                    entity_type = %entity.entity_type,
                    entity_id = %id,
                    error = %e,
                    "Failed to apply remote record"
                );
                Merge::Rejected
            }
        }
    }
}
