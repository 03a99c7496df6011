//! # Domain Types
//!
//! Change-log types shared by the storage and network layers.
//!
//! ## Entry State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    ChangeLogEntry Lifecycle                             │
//! │                                                                         │
//! │   record_change()                                                      │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   ┌─────────┐  push selects   ┌─────────┐  transport ok  ┌───────────┐ │
//! │   │ PENDING │ ──────────────► │ SYNCING │ ─────────────► │ COMPLETED │ │
//! │   └─────────┘                 └────┬────┘                └─────┬─────┘ │
//! │        ▲                           │ transport failed          │       │
//! │        │ reset_failed()            ▼                           │       │
//! │        │                      ┌─────────┐                      │       │
//! │        └───────────────────── │ FAILED  │                      │       │
//! │                               └────┬────┘                      │       │
//! │           re-selected next cycle   │                 sweep (age)│       │
//! │           (goes straight to        │                           ▼       │
//! │            SYNCING again)  ◄───────┘                       [deleted]   │
//! │                                                                         │
//! │  ACTIONABLE = PENDING or FAILED. At most one per (type, id).           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Collapse Rule
//! A mutation on a key that already has an actionable entry rewrites that
//! entry instead of adding a second one:
//! ```text
//!   earlier   later    →  stored
//!   ───────   ──────      ──────
//!   create    update   →  create   (master has never seen the record)
//!   create    create   →  create
//!   update    create   →  update
//!   update    update   →  update
//!   any       delete   →  delete   (payload = pre-delete snapshot)
//!   delete    create   →  update   (record re-appeared under the same id)
//!   delete    update   →  update
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// =============================================================================
// Change Action
// =============================================================================

/// The kind of mutation a change-log entry stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Record was inserted locally.
    Create,
    /// Record was modified locally.
    Update,
    /// Record was removed locally.
    Delete,
}

impl ChangeAction {
    /// Returns the action to store when `next` happens on a key whose
    /// actionable entry currently holds `self`.
    pub fn supersede(self, next: ChangeAction) -> ChangeAction {
        match (self, next) {
            (_, ChangeAction::Delete) => ChangeAction::Delete,
            (ChangeAction::Create, _) => ChangeAction::Create,
            (ChangeAction::Update, _) => ChangeAction::Update,
            (ChangeAction::Delete, _) => ChangeAction::Update,
        }
    }

    /// Returns true if the outbound record must come from the stored
    /// payload because the local record no longer exists.
    pub fn uses_snapshot(&self) -> bool {
        matches!(self, ChangeAction::Delete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChangeAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" | "created" | "insert" => Ok(ChangeAction::Create),
            "update" | "updated" => Ok(ChangeAction::Update),
            "delete" | "deleted" => Ok(ChangeAction::Delete),
            other => Err(CoreError::InvalidAction(other.to_string())),
        }
    }
}

// =============================================================================
// Change Status
// =============================================================================

/// Where a change-log entry is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    /// Waiting for the next push.
    #[default]
    Pending,
    /// Selected by a push that has not finished yet.
    Syncing,
    /// Accepted by the master. Kept until the retention sweep.
    Completed,
    /// Last push failed. Re-selected by the next cycle.
    Failed,
}

impl ChangeStatus {
    /// Statuses the push engine selects.
    pub const ACTIONABLE: [ChangeStatus; 2] = [ChangeStatus::Pending, ChangeStatus::Failed];

    pub fn is_actionable(&self) -> bool {
        matches!(self, ChangeStatus::Pending | ChangeStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Syncing => "syncing",
            ChangeStatus::Completed => "completed",
            ChangeStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChangeStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ChangeStatus::Pending),
            "syncing" => Ok(ChangeStatus::Syncing),
            "completed" => Ok(ChangeStatus::Completed),
            "failed" => Ok(ChangeStatus::Failed),
            other => Err(CoreError::InvalidStatus(other.to_string())),
        }
    }
}

// =============================================================================
// Change Log Entry
// =============================================================================

/// One pending or attempted synchronization of one local record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ChangeLogEntry {
    /// UUID v4, used to correlate push responses.
    pub id: String,
    /// Owning entity type (table name).
    pub entity_type: String,
    /// Primary key of the affected record, as text.
    pub entity_id: String,
    pub action: ChangeAction,
    pub status: ChangeStatus,
    /// Push attempts so far.
    pub attempts: i64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Last failure reason. Cleared on success and on new mutations.
    pub error_message: Option<String>,
    /// JSON snapshot of the record. Always set for deletes.
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChangeLogEntry {
    /// Parses the stored snapshot, if any.
    ///
    /// A snapshot that is not valid JSON is treated as absent.
    pub fn payload_json(&self) -> Option<serde_json::Value> {
        self.payload
            .as_deref()
            .and_then(|p| serde_json::from_str(p).ok())
    }
}

// =============================================================================
// Status Counts
// =============================================================================

/// Aggregate change-log counts per status, for operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub syncing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: ChangeStatus, count: i64) {
        match status {
            ChangeStatus::Pending => self.pending += count,
            ChangeStatus::Syncing => self.syncing += count,
            ChangeStatus::Completed => self.completed += count,
            ChangeStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.syncing + self.completed + self.failed
    }

    /// Entries the next push will pick up.
    pub fn actionable(&self) -> i64 {
        self.pending + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_update_stays_create() {
        assert_eq!(
            ChangeAction::Create.supersede(ChangeAction::Update),
            ChangeAction::Create
        );
    }

    #[test]
    fn test_anything_then_delete_is_delete() {
        for earlier in [ChangeAction::Create, ChangeAction::Update, ChangeAction::Delete] {
            assert_eq!(earlier.supersede(ChangeAction::Delete), ChangeAction::Delete);
        }
    }

    #[test]
    fn test_delete_then_recreate_is_update() {
        assert_eq!(
            ChangeAction::Delete.supersede(ChangeAction::Create),
            ChangeAction::Update
        );
        assert_eq!(
            ChangeAction::Delete.supersede(ChangeAction::Update),
            ChangeAction::Update
        );
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("create".parse::<ChangeAction>().unwrap(), ChangeAction::Create);
        assert_eq!("Updated".parse::<ChangeAction>().unwrap(), ChangeAction::Update);
        assert_eq!("DELETE".parse::<ChangeAction>().unwrap(), ChangeAction::Delete);
        assert!("upsert".parse::<ChangeAction>().is_err());
    }

    #[test]
    fn test_status_actionable() {
        assert!(ChangeStatus::Pending.is_actionable());
        assert!(ChangeStatus::Failed.is_actionable());
        assert!(!ChangeStatus::Syncing.is_actionable());
        assert!(!ChangeStatus::Completed.is_actionable());
        assert_eq!(ChangeStatus::default(), ChangeStatus::Pending);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&ChangeStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        let action: ChangeAction = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(action, ChangeAction::Delete);
    }

    #[test]
    fn test_status_counts() {
        let mut counts = StatusCounts::default();
        counts.add(ChangeStatus::Pending, 2);
        counts.add(ChangeStatus::Failed, 1);
        counts.add(ChangeStatus::Completed, 5);
        assert_eq!(counts.total(), 8);
        assert_eq!(counts.actionable(), 3);
    }

    #[test]
    fn test_payload_json_tolerates_garbage() {
        let now = Utc::now();
        let mut entry = ChangeLogEntry {
            id: "e1".into(),
            entity_type: "products".into(),
            entity_id: "1".into(),
            action: ChangeAction::Delete,
            status: ChangeStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            error_message: None,
            payload: Some("{\"id\":1}".into()),
            created_at: now,
            updated_at: now,
        };
        assert_eq!(entry.payload_json(), Some(serde_json::json!({"id": 1})));

        entry.payload = Some("not json".into());
        assert_eq!(entry.payload_json(), None);
    }
}
