//! # Sync Orchestrator
//!
//! Runs one sync cycle end to end.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  run_cycle()                                                            │
//! │                                                                         │
//! │  1. probe ─────── offline ──► CycleReport { postponed: true }           │
//! │       │                       (no requests, no change-log writes)       │
//! │       ▼                                                                 │
//! │  2. discover ──── none ─────► CycleReport { "No syncable entity types" }│
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  3. pull   every entity type   (merge remote state in first)           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  4. requeue entries stuck in `syncing` by an interrupted cycle          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  5. push   every entity type                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  CycleReport { pull, push }   per-entity outcomes inside                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cycle itself never fails. Entity-level failures are reported in the
//! per-entity outcomes and retried by the next cycle. Cycles are expected
//! not to overlap; the scheduler that invokes them guarantees that.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::probe::ConnectivityProbe;
use crate::pull::PullEngine;
use crate::push::PushEngine;
use crate::registry::EntityRegistry;
use crate::report::CycleReport;
use crate::transport::{MasterClient, TransportConfig};
use syncline_core::StatusCounts;
use syncline_db::Database;

/// Pull and push engines sharing one master client.
#[derive(Debug, Clone)]
struct Engines {
    pull: PullEngine,
    push: PushEngine,
}

/// Top-level sync coordinator.
#[derive(Debug, Clone)]
pub struct SyncOrchestrator {
    config: SyncConfig,
    db: Database,
    probe: ConnectivityProbe,
    registry: EntityRegistry,

    /// `None` when no master URL is configured (master role).
    engines: Option<Engines>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator over an open database.
    ///
    /// ## Errors
    /// Configuration errors: an invalid config, an unparseable default
    /// start date, or a master URL that cannot be used.
    pub fn new(config: SyncConfig, db: Database) -> SyncResult<Self> {
        config.validate()?;

        let engines = match config.sync.base_url {
            Some(_) => {
                let client = MasterClient::new(TransportConfig::from_settings(&config.sync)?)?;
                Some(Engines {
                    pull: PullEngine::new(client.clone(), db.cursors(), config.default_start()?),
                    push: PushEngine::new(client, db.change_log()),
                })
            }
            None => None,
        };

        Ok(SyncOrchestrator {
            probe: ConnectivityProbe::from_config(&config),
            registry: EntityRegistry::new(db.clone(), &config.entities),
            config,
            db,
            engines,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Runs one full cycle: probe, discover, pull, push.
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = Utc::now();

        let Some(engines) = &self.engines else {
            warn!("No master URL configured, nothing to sync with");
            return CycleReport::short_circuit(started_at, false, "No master configured");
        };

        if !self.probe.is_online().await {
            info!("Offline, sync cycle postponed");
            return CycleReport::short_circuit(started_at, true, "Offline, sync postponed");
        }

        let entities = self.registry.discover().await;
        if entities.is_empty() {
            info!("No syncable entity types, nothing to do");
            return CycleReport::short_circuit(started_at, false, "No syncable entity types");
        }

        let pull = engines.pull.pull_all(&entities, started_at).await;

        let stale_requeued = match self
            .db
            .change_log()
            .requeue_stale_syncing(self.config.stale_syncing_after())
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Failed to requeue stale syncing entries");
                0
            }
        };

        let push = engines.push.push_all(&entities).await;

        let report = CycleReport {
            started_at,
            finished_at: Utc::now(),
            postponed: false,
            stale_requeued,
            pull,
            push,
        };

        info!(
            pulled = report.pull.total,
            pushed = report.push.total,
            pull_failures = report.pull.failed_entities().count(),
            push_failures = report.push.failed_entities().count(),
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Sync cycle finished"
        );

        report
    }

    /// Runs a cycle if this node's role is `slave`.
    pub async fn run_scheduled_cycle(&self) -> Option<CycleReport> {
        if !self.config.role().runs_cycles() {
            debug!(role = %self.config.role(), "Role does not run sync cycles");
            return None;
        }
        Some(self.run_cycle().await)
    }

    /// Deletes completed change-log entries older than `max_age_days`.
    pub async fn cleanup_old_logs(&self, max_age_days: u32) -> SyncResult<u64> {
        let deleted = self.db.change_log().sweep(max_age_days).await?;
        info!(deleted, max_age_days, "Change log cleanup finished");
        Ok(deleted)
    }

    /// [`cleanup_old_logs`](Self::cleanup_old_logs) with the configured
    /// retention.
    pub async fn cleanup_with_configured_retention(&self) -> SyncResult<u64> {
        self.cleanup_old_logs(self.config.change_log.retention_days)
            .await
    }

    /// Change-log entry counts per status.
    pub async fn stats(&self) -> SyncResult<StatusCounts> {
        Ok(self.db.change_log().status_counts(None).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncRole;
    use crate::testing::{record, test_database, MockMaster};
    use serde_json::json;
    use syncline_core::ChangeStatus;
    use syncline_db::WriteOrigin;

    async fn orchestrator(master: &MockMaster, db: &Database) -> SyncOrchestrator {
        SyncOrchestrator::new(master.slave_config(), db.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_offline_cycle_touches_nothing() {
        let db = test_database().await;
        let master = MockMaster::start().await;
        master.set_pull("orders", json!([{"id": 1}]));

        db.entity("tags")
            .unwrap()
            .insert(record(json!({"id": 1, "label": "x"})), WriteOrigin::Local)
            .await
            .unwrap();

        let mut config = master.slave_config();
        config.connectivity.endpoints = vec!["127.0.0.1:1".into()];
        let sync = SyncOrchestrator::new(config, db.clone()).unwrap();

        let report = sync.run_cycle().await;

        assert!(report.postponed);
        assert!(report.is_clean());
        assert_eq!(master.requests(), 0);

        let pending = db.change_log().list_by_status(ChangeStatus::Pending, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 0);
        assert!(db.entity("orders").unwrap().find("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_cycle_pulls_then_pushes_without_echo() {
        let db = test_database().await;
        let master = MockMaster::start().await;
        master.set_pull(
            "orders",
            json!([{"id": 10, "customer": "remote", "updated_at": "2024-05-01T00:00:00Z"}]),
        );
        db.entity("tags")
            .unwrap()
            .insert(record(json!({"id": 1, "label": "local"})), WriteOrigin::Local)
            .await
            .unwrap();

        let report = orchestrator(&master, &db).await.run_cycle().await;

        assert!(!report.postponed);
        assert!(report.is_clean());
        assert_eq!(report.pull.total, 1);
        assert_eq!(report.push.total, 1);
        assert_eq!(report.pull.entities.len(), 3);

        assert!(master.pushed("orders").is_empty());
        assert_eq!(master.pushed("tags")[0][0]["label"], json!("local"));
        assert_eq!(db.cursors().get("orders").await.unwrap(), Some(report.started_at));

        let stats = orchestrator(&master, &db).await.stats().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.actionable(), 0);
    }

    #[tokio::test]
    async fn test_master_role_skips_scheduled_cycles() {
        let db = test_database().await;
        let mut config = SyncConfig::default();
        config.sync.role = SyncRole::Master;

        let sync = SyncOrchestrator::new(config, db).unwrap();

        assert!(sync.run_scheduled_cycle().await.is_none());
    }

    #[tokio::test]
    async fn test_no_entity_types_short_circuits() {
        let db = test_database().await;
        let master = MockMaster::start().await;
        let mut config = master.slave_config();
        config.entities.include = vec!["ghosts".into()];

        let report = SyncOrchestrator::new(config, db)
            .unwrap()
            .run_scheduled_cycle()
            .await
            .unwrap();

        assert!(!report.postponed);
        assert_eq!(report.pull.message, "No syncable entity types");
        assert!(report.pull.entities.is_empty());
        assert_eq!(master.requests(), 0);
    }

    #[tokio::test]
    async fn test_stale_syncing_entry_is_sent_again() {
        let db = test_database().await;
        let master = MockMaster::start().await;
        db.entity("tags")
            .unwrap()
            .insert(record(json!({"id": 1, "label": "stuck"})), WriteOrigin::Local)
            .await
            .unwrap();

        let log = db.change_log();
        let entry = log.select_actionable("tags").await.unwrap().remove(0);
        assert!(log.mark_syncing(&entry.id).await.unwrap());
        sqlx::query("UPDATE sync_change_log SET last_attempt_at = ?1 WHERE id = ?2")
            .bind(Utc::now() - chrono::Duration::hours(1))
            .bind(&entry.id)
            .execute(db.pool())
            .await
            .unwrap();

        let report = orchestrator(&master, &db).await.run_cycle().await;

        assert_eq!(report.stale_requeued, 1);
        assert_eq!(master.pushed("tags").len(), 1);
        let entry = log.find(&entry.id).await.unwrap().unwrap();
        assert_eq!(entry.status, ChangeStatus::Completed);
        assert_eq!(entry.attempts, 2);
    }

    #[tokio::test]
    async fn test_cleanup_removes_old_completed_entries() {
        let db = test_database().await;
        let master = MockMaster::start().await;
        let tags = db.entity("tags").unwrap();
        for id in 1..=2 {
            tags.insert(record(json!({"id": id})), WriteOrigin::Local)
                .await
                .unwrap();
        }

        let sync = orchestrator(&master, &db).await;
        sync.run_cycle().await;
        tags.insert(record(json!({"id": 3})), WriteOrigin::Local)
            .await
            .unwrap();

        sqlx::query("UPDATE sync_change_log SET updated_at = ?1 WHERE status = 'completed'")
            .bind(Utc::now() - chrono::Duration::days(30))
            .execute(db.pool())
            .await
            .unwrap();

        assert_eq!(sync.cleanup_with_configured_retention().await.unwrap(), 2);

        let stats = sync.stats().await.unwrap();
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.pending, 1);
    }
}
