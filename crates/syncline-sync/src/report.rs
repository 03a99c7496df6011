//! # Cycle Reports
//!
//! What a sync cycle hands back to its caller.
//!
//! ```text
//! CycleReport
//! ├── postponed            true when the probe found no network
//! ├── pull: PhaseResult    success, message, total, per-entity outcomes
//! └── push: PhaseResult
//! ```
//!
//! A phase's `success` only says the phase itself ran. Partial failure is
//! visible in the per-entity outcomes, see [`PhaseResult::failed_entities`].

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of one phase for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityOutcome {
    pub entity_type: String,
    pub success: bool,

    /// Records applied (pull) or entries sent (push).
    pub count: usize,

    /// Pull: records skipped by the timestamp rule.
    pub skipped: usize,

    /// Records or entries rejected individually (bad id, unreadable row).
    pub rejected: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EntityOutcome {
    /// A successful outcome.
    pub fn ok(entity_type: &str, count: usize, skipped: usize, rejected: usize) -> Self {
        EntityOutcome {
            entity_type: entity_type.to_string(),
            success: true,
            count,
            skipped,
            rejected,
            error: None,
        }
    }

    /// A failed outcome carrying the reason.
    pub fn failed(entity_type: &str, error: impl ToString) -> Self {
        EntityOutcome {
            entity_type: entity_type.to_string(),
            success: false,
            count: 0,
            skipped: 0,
            rejected: 0,
            error: Some(error.to_string()),
        }
    }
}

/// Aggregate result of one phase (pull or push) across entity types.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseResult {
    pub success: bool,
    pub message: String,
    pub total: usize,
    pub entities: Vec<EntityOutcome>,
}

impl PhaseResult {
    /// A phase that did nothing, with the reason.
    pub fn empty(message: impl Into<String>) -> Self {
        PhaseResult {
            success: true,
            message: message.into(),
            total: 0,
            entities: Vec::new(),
        }
    }

    /// Builds the phase summary. `verb` reads like "Pulled" or "Pushed".
    pub fn from_outcomes(verb: &str, entities: Vec<EntityOutcome>) -> Self {
        let total = entities.iter().map(|e| e.count).sum();
        let failed = entities.iter().filter(|e| !e.success).count();

        let mut message = format!(
            "{} {} records across {} entity types",
            verb,
            total,
            entities.len()
        );
        if failed > 0 {
            message.push_str(&format!(" ({} failed)", failed));
        }

        PhaseResult {
            success: true,
            message,
            total,
            entities,
        }
    }

    /// Entity types whose phase failed.
    pub fn failed_entities(&self) -> impl Iterator<Item = &EntityOutcome> {
        self.entities.iter().filter(|e| !e.success)
    }

    /// Looks up the outcome for one entity type.
    pub fn outcome(&self, entity_type: &str) -> Option<&EntityOutcome> {
        self.entities.iter().find(|e| e.entity_type == entity_type)
    }
}

/// Result of one sync cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    /// When the cycle started. Pull cursors advance to this instant.
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// The probe found no network; nothing was attempted.
    pub postponed: bool,

    /// Entries recovered from an interrupted earlier cycle.
    pub stale_requeued: u64,

    pub pull: PhaseResult,
    pub push: PhaseResult,
}

impl CycleReport {
    /// A cycle that stopped before touching any entity type.
    pub fn short_circuit(started_at: DateTime<Utc>, postponed: bool, message: &str) -> Self {
        CycleReport {
            started_at,
            finished_at: Utc::now(),
            postponed,
            stale_requeued: 0,
            pull: PhaseResult::empty(message),
            push: PhaseResult::empty(message),
        }
    }

    /// True if every entity type succeeded in both phases.
    pub fn is_clean(&self) -> bool {
        self.pull.failed_entities().next().is_none() && self.push.failed_entities().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_summary_counts_failures() {
        let phase = PhaseResult::from_outcomes(
            "Pushed",
            vec![
                EntityOutcome::ok("orders", 3, 0, 0),
                EntityOutcome::failed("customers", "Master returned HTTP 500: boom"),
            ],
        );

        assert!(phase.success);
        assert_eq!(phase.total, 3);
        assert_eq!(phase.message, "Pushed 3 records across 2 entity types (1 failed)");
        assert_eq!(phase.failed_entities().count(), 1);
        assert!(phase.outcome("customers").unwrap().error.is_some());
    }

    #[test]
    fn test_short_circuit_report_is_clean() {
        let report = CycleReport::short_circuit(Utc::now(), true, "Offline");
        assert!(report.postponed);
        assert!(report.is_clean());
        assert_eq!(report.pull.total, 0);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["postponed"], serde_json::json!(true));
        assert_eq!(json["push"]["message"], serde_json::json!("Offline"));
    }
}
