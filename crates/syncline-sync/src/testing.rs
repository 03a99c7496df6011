//! In-process master and fixtures for tests.
//!
//! The mock serves the same endpoints a real master does under
//! `/api/sync`, bound to an ephemeral port on 127.0.0.1.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::config::SyncConfig;
use syncline_db::{Database, DbConfig};

#[derive(Default)]
struct MasterState {
    pull_data: HashMap<String, Value>,
    pull_failures: HashMap<String, u32>,
    pull_requests: HashMap<String, usize>,
    last_since: HashMap<String, String>,
    failing_pushes: HashSet<String>,
    pushed: HashMap<String, Vec<Vec<Value>>>,
    requests: usize,
}

type Shared = Arc<Mutex<MasterState>>;

pub struct MockMaster {
    pub base_url: String,
    pub addr: SocketAddr,
    state: Shared,
}

impl MockMaster {
    pub async fn start() -> Self {
        let state: Shared = Arc::default();

        let app = Router::new()
            .route("/api/sync/pull/{entity}", get(pull))
            .route("/api/sync/push/{entity}", post(push))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        MockMaster {
            base_url: format!("http://{}/api/sync", addr),
            addr,
            state,
        }
    }

    /// Body served by `GET pull/{entity}`.
    pub fn set_pull(&self, entity: &str, body: Value) {
        self.state.lock().unwrap().pull_data.insert(entity.to_string(), body);
    }

    /// Answer the next `times` pulls of `entity` with 503.
    pub fn fail_pulls(&self, entity: &str, times: u32) {
        self.state.lock().unwrap().pull_failures.insert(entity.to_string(), times);
    }

    /// Answer every push of `entity` with 500.
    pub fn fail_pushes(&self, entity: &str) {
        self.state.lock().unwrap().failing_pushes.insert(entity.to_string());
    }

    pub fn accept_pushes(&self, entity: &str) {
        self.state.lock().unwrap().failing_pushes.remove(entity);
    }

    /// Batches accepted for `entity`, in arrival order.
    pub fn pushed(&self, entity: &str) -> Vec<Vec<Value>> {
        self.state.lock().unwrap().pushed.get(entity).cloned().unwrap_or_default()
    }

    pub fn pull_requests(&self, entity: &str) -> usize {
        self.state.lock().unwrap().pull_requests.get(entity).copied().unwrap_or(0)
    }

    pub fn last_since(&self, entity: &str) -> Option<String> {
        self.state.lock().unwrap().last_since.get(entity).cloned()
    }

    /// Requests of any kind received so far.
    pub fn requests(&self) -> usize {
        self.state.lock().unwrap().requests
    }

    /// A slave configuration pointed at this master. The probe checks the
    /// master's own socket so tests never need outside network access.
    pub fn slave_config(&self) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.sync.base_url = Some(self.base_url.clone());
        config.sync.timeout_secs = 5;
        config.sync.initial_backoff_ms = 10;
        config.sync.max_backoff_secs = 1;
        config.connectivity.endpoints = vec![self.addr.to_string()];
        config.connectivity.timeout_secs = 1;
        config
    }
}

async fn pull(
    State(state): State<Shared>,
    Path(entity): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().unwrap();
    state.requests += 1;
    *state.pull_requests.entry(entity.clone()).or_default() += 1;

    if let Some(since) = params.get("since") {
        state.last_since.insert(entity.clone(), since.clone());
    }

    if let Some(remaining) = state.pull_failures.get_mut(&entity) {
        if *remaining > 0 {
            *remaining -= 1;
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "try later"})));
        }
    }

    let body = state.pull_data.get(&entity).cloned().unwrap_or_else(|| json!([]));
    (StatusCode::OK, Json(body))
}

async fn push(
    State(state): State<Shared>,
    Path(entity): Path<String>,
    Json(records): Json<Vec<Value>>,
) -> StatusCode {
    let mut state = state.lock().unwrap();
    state.requests += 1;

    if state.failing_pushes.contains(&entity) {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    state.pushed.entry(entity).or_default().push(records);
    StatusCode::OK
}

/// In-memory database with two timestamped entity tables and one without
/// timestamps.
pub async fn test_database() -> Database {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();

    for ddl in [
        "CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            customer TEXT,
            total REAL,
            created_at TEXT,
            updated_at TEXT
        )",
        "CREATE TABLE customers (
            id TEXT PRIMARY KEY,
            name TEXT,
            created_at TEXT,
            updated_at TEXT
        )",
        "CREATE TABLE tags (id INTEGER PRIMARY KEY, label TEXT)",
    ] {
        sqlx::query(ddl).execute(db.pool()).await.unwrap();
    }

    db
}

/// Builds a record from a JSON object literal.
pub fn record(value: Value) -> syncline_core::Record {
    value.as_object().cloned().unwrap()
}
