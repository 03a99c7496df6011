//! # Push Engine
//!
//! Drains the change log outward, one batch per entity type.
//!
//! ## Per Entity Type
//! ```text
//! select_actionable(E)          pending + failed, oldest first
//!        │  empty → zero-count success, no request
//!        ▼
//! for each entry:
//!   mark_syncing                claim failed → someone else has it, skip
//!   build outbound record
//!     delete        → { id, action: "delete", data: <snapshot>, sync_log_id }
//!     create/update → current row + action + sync_log_id
//!                     (row gone → stored snapshot; neither → entry failed)
//!        │
//!        ▼
//! POST push/E [records]         one request, never retried in-cycle
//!   2xx   → mark_completed(all ids)
//!   error → mark_failed(all ids, reason)
//! ```
//!
//! Acknowledgement is per batch. A 2xx means every entry in the batch is
//! completed, even if the master quietly dropped some of them.

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::registry::EntityDescriptor;
use crate::report::{EntityOutcome, PhaseResult};
use crate::transport::MasterClient;
use syncline_core::validation::id_to_string;
use syncline_core::{ChangeAction, ChangeLogEntry, ACTION_FIELD, ID_FIELD, SYNC_LOG_ID_FIELD};
use syncline_db::ChangeLogRepository;

/// Field holding the pre-delete snapshot on delete records.
pub const DELETE_DATA_FIELD: &str = "data";

/// Per-entity push counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushStats {
    pub selected: usize,
    pub sent: usize,
    pub rejected: usize,
}

/// Sends local changes to the master.
#[derive(Debug, Clone)]
pub struct PushEngine {
    client: MasterClient,
    change_log: ChangeLogRepository,
}

impl PushEngine {
    pub fn new(client: MasterClient, change_log: ChangeLogRepository) -> Self {
        PushEngine { client, change_log }
    }

    /// Pushes every entity type. One type's failure never stops the others.
    pub async fn push_all(&self, entities: &[EntityDescriptor]) -> PhaseResult {
        let mut outcomes = Vec::with_capacity(entities.len());

        for entity in entities {
            let outcome = match self.push_entity(entity).await {
                Ok(stats) => {
                    if stats.selected > 0 {
                        info!(
                            entity_type = %entity.entity_type,
                            sent = stats.sent,
                            rejected = stats.rejected,
                            "Push complete"
                        );
                    }
                    EntityOutcome::ok(&entity.entity_type, stats.sent, 0, stats.rejected)
                }
                Err(e) => {
                    warn!(entity_type = %entity.entity_type, error = %e, "Push failed");
                    EntityOutcome::failed(&entity.entity_type, e)
                }
            };
            outcomes.push(outcome);
        }

        PhaseResult::from_outcomes("Pushed", outcomes)
    }

    /// Pushes the actionable entries of one entity type.
    ///
    /// ## Errors
    /// The transport or database error, after every entry claimed so far
    /// is marked failed.
    pub async fn push_entity(&self, entity: &EntityDescriptor) -> SyncResult<PushStats> {
        let entries = self.change_log.select_actionable(&entity.entity_type).await?;

        let mut stats = PushStats {
            selected: entries.len(),
            ..Default::default()
        };
        if entries.is_empty() {
            return Ok(stats);
        }

        let mut claimed = Vec::with_capacity(entries.len());

        let records = match self.claim_batch(entity, entries, &mut claimed, &mut stats).await {
            Ok(records) => records,
            Err(e) => {
                self.release(&entity.entity_type, &claimed, &e).await;
                return Err(e);
            }
        };

        if records.is_empty() {
            return Ok(stats);
        }

        match self.client.push(&entity.entity_type, &records).await {
            Ok(()) => {
                self.change_log.mark_completed(&claimed).await?;
                stats.sent = claimed.len();
                Ok(stats)
            }
            Err(e) => {
                self.change_log.mark_failed(&claimed, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Claims each entry and builds its outbound record. Ids of entries
    /// that made it into the batch are collected in `claimed`.
    async fn claim_batch(
        &self,
        entity: &EntityDescriptor,
        entries: Vec<ChangeLogEntry>,
        claimed: &mut Vec<String>,
        stats: &mut PushStats,
    ) -> SyncResult<Vec<Value>> {
        let mut records = Vec::with_capacity(entries.len());

        for entry in entries {
            if !self.change_log.mark_syncing(&entry.id).await? {
                debug!(entry_id = %entry.id, "Change log entry already claimed, skipping");
                continue;
            }

            match self.build_outbound(entity, &entry).await {
                Ok(record) => {
                    records.push(record);
                    claimed.push(entry.id);
                }
                Err(e) => {
                    warn!(
                        entity_type = %entity.entity_type,
                        entity_id = %entry.entity_id,
                        entry_id = %entry.id,
                        error = %e,
                        "Cannot build outbound record"
                    );
                    let marked = self
                        .change_log
                        .mark_failed(std::slice::from_ref(&entry.id), &e.to_string())
                        .await;
                    if let Err(db_err) = marked {
                        // Still claimed, let the caller release it with the rest
                        claimed.push(entry.id);
                        return Err(db_err.into());
                    }
                    stats.rejected += 1;
                }
            }
        }

        Ok(records)
    }

    /// Puts claimed entries back in play after the batch was abandoned, so
    /// they are not stuck in `syncing` until the stale requeue.
    async fn release(&self, entity_type: &str, claimed: &[String], cause: &SyncError) {
        if claimed.is_empty() {
            return;
        }
        if let Err(e) = self.change_log.mark_failed(claimed, &cause.to_string()).await {
            warn!(
                entity_type = %entity_type,
                count = claimed.len(),
                error = %e,
                "Failed to release claimed change log entries"
            );
        }
    }

    /// Builds the wire record for one entry.
    async fn build_outbound(
        &self,
        entity: &EntityDescriptor,
        entry: &ChangeLogEntry,
    ) -> SyncResult<Value> {
        if entry.action == ChangeAction::Delete {
            let snapshot = entry.payload_json().unwrap_or(Value::Null);
            // Keep the id's own JSON type (integer keys stay integers)
            let id = snapshot
                .get(ID_FIELD)
                .filter(|id| id_to_string(id).as_deref() == Some(entry.entity_id.as_str()))
                .cloned()
                .unwrap_or_else(|| Value::from(entry.entity_id.clone()));

            return Ok(json!({
                ID_FIELD: id,
                ACTION_FIELD: ChangeAction::Delete.as_str(),
                DELETE_DATA_FIELD: snapshot,
                SYNC_LOG_ID_FIELD: entry.id,
            }));
        }

        let mut record: Map<String, Value> = match entity.table.find(&entry.entity_id).await? {
            Some(current) => current,
            None => match entry.payload_json() {
                Some(Value::Object(snapshot)) => {
                    debug!(
                        entity_type = %entity.entity_type,
                        entity_id = %entry.entity_id,
                        "Record no longer exists, sending stored snapshot"
                    );
                    snapshot
                }
                _ => {
                    return Err(SyncError::InvalidRecord(format!(
                        "{} {} no longer exists and has no snapshot",
                        entity.entity_type, entry.entity_id
                    )))
                }
            },
        };

        record.insert(ACTION_FIELD.to_string(), Value::from(entry.action.as_str()));
        record.insert(SYNC_LOG_ID_FIELD.to_string(), Value::from(entry.id.clone()));

        Ok(Value::Object(record))
    }
}
