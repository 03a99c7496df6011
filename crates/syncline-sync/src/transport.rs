//! # Master Transport
//!
//! HTTP client for the master's pull and push endpoints.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  GET  {base}/pull/{entity}?since={cursor}   → JSON array of records    │
//! │  POST {base}/push/{entity}   [records]      → any 2xx                  │
//! │                                                                         │
//! │  Anything else (non-2xx, timeout, body that isn't an array) is a hard  │
//! │  failure for that entity type in this cycle.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retries
//! Pulls are idempotent, so a pull that fails with a retryable error is
//! repeated up to `pull_retries` times with exponential backoff:
//! ```text
//! Attempt 1: fails (503)
//!   wait ~250ms
//! Attempt 2: fails (timeout)
//!   wait ~500ms
//! Attempt 3: ok
//! ```
//! Pushes are never retried inside a cycle; their entries go to `failed`
//! and the next cycle sends them again.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::SyncSettings;
use crate::error::{SyncError, SyncResult};

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

// =============================================================================
// Transport Configuration
// =============================================================================

/// Configuration for the master client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL of the sync endpoints.
    pub base_url: String,

    /// Timeout for each request.
    pub timeout: Duration,

    /// Extra attempts for a retryable pull failure.
    pub pull_retries: u32,

    /// Initial backoff duration.
    pub initial_backoff: Duration,

    /// Maximum backoff duration.
    pub max_backoff: Duration,
}

impl TransportConfig {
    /// Builds the transport configuration from sync settings.
    pub fn from_settings(settings: &SyncSettings) -> SyncResult<Self> {
        let base_url = settings.base_url.clone().ok_or_else(|| {
            SyncError::InvalidConfig("sync.base_url is required to reach the master".into())
        })?;

        Ok(TransportConfig {
            base_url,
            timeout: Duration::from_secs(settings.timeout_secs),
            pull_retries: settings.pull_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_secs(settings.max_backoff_secs),
        })
    }
}

// =============================================================================
// Master Client
// =============================================================================

/// Client for one master.
#[derive(Debug, Clone)]
pub struct MasterClient {
    http: reqwest::Client,
    base: Url,
    config: TransportConfig,
}

impl MasterClient {
    /// Creates a client.
    ///
    /// ## Errors
    /// `SyncError::InvalidUrl` if the base URL cannot carry path segments.
    pub fn new(config: TransportConfig) -> SyncResult<Self> {
        let base = Url::parse(&config.base_url)?;
        if base.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(config.base_url.clone()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("HTTP client setup failed: {}", e)))?;

        Ok(MasterClient { http, base, config })
    }

    /// Fetches remote records for an entity type changed since `since`.
    ///
    /// `since` is advisory; the master may return more.
    pub async fn pull(&self, entity_type: &str, since: DateTime<Utc>) -> SyncResult<Vec<Value>> {
        let mut url = self.endpoint("pull", entity_type)?;
        url.query_pairs_mut()
            .append_pair("since", &since.to_rfc3339_opts(SecondsFormat::Secs, true));

        let mut backoff = self.create_backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match self.pull_once(&url).await {
                Ok(records) => {
                    debug!(entity_type = %entity_type, count = records.len(), attempt, "Pulled records");
                    return Ok(records);
                }
                Err(e) if e.is_retryable() && attempt <= self.config.pull_retries => {
                    let Some(delay) = backoff.next_backoff() else {
                        return Err(e);
                    };
                    warn!(
                        entity_type = %entity_type,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Pull failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends one batch of outbound records for an entity type.
    pub async fn push(&self, entity_type: &str, records: &[Value]) -> SyncResult<()> {
        let url = self.endpoint("push", entity_type)?;

        let response = self
            .http
            .post(url)
            .json(records)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.check_status(response).await?;

        debug!(entity_type = %entity_type, count = records.len(), "Pushed batch");
        Ok(())
    }

    async fn pull_once(&self, url: &Url) -> SyncResult<Vec<Value>> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let response = self.check_status(response).await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| SyncError::MalformedResponse(e.to_string()))?;

        match body {
            Value::Array(records) => Ok(records),
            other => Err(SyncError::MalformedResponse(format!(
                "expected a JSON array, got {}",
                json_kind(&other)
            ))),
        }
    }

    async fn check_status(&self, response: reqwest::Response) -> SyncResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }

        Err(SyncError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }

    /// `{base}/{op}/{entity}`, keeping any path prefix on the base URL.
    fn endpoint(&self, op: &str, entity_type: &str) -> SyncResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.config.base_url.clone()))?
            .pop_if_empty()
            .push(op)
            .push(entity_type);
        Ok(url)
    }

    fn transport_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.config.timeout.as_secs())
        } else if err.is_decode() {
            SyncError::MalformedResponse(err.to_string())
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }

    /// Creates the exponential backoff configuration.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None, // Bounded by pull_retries instead
            ..Default::default()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockMaster;
    use chrono::TimeZone;
    use serde_json::json;

    fn client_for(base_url: &str) -> MasterClient {
        MasterClient::new(TransportConfig {
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(5),
            pull_retries: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        })
        .unwrap()
    }

    fn since() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = client_for("https://master.example.com/api/sync/");
        let url = client.endpoint("pull", "orders").unwrap();
        assert_eq!(url.as_str(), "https://master.example.com/api/sync/pull/orders");

        let client = client_for("https://master.example.com");
        let url = client.endpoint("push", "orders").unwrap();
        assert_eq!(url.as_str(), "https://master.example.com/push/orders");
    }

    #[test]
    fn test_missing_base_url_is_config_error() {
        let err = TransportConfig::from_settings(&SyncSettings::default()).unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_pull_returns_array_and_sends_cursor() {
        let master = MockMaster::start().await;
        master.set_pull("orders", json!([{"id": 1}, {"id": 2}]));

        let records = client_for(&master.base_url).pull("orders", since()).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(
            master.last_since("orders").as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[tokio::test]
    async fn test_pull_rejects_non_array_body() {
        let master = MockMaster::start().await;
        master.set_pull("orders", json!({"data": []}));

        let err = client_for(&master.base_url)
            .pull("orders", since())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::MalformedResponse(_)));
        assert_eq!(master.pull_requests("orders"), 1);
    }

    #[tokio::test]
    async fn test_pull_retries_transient_failures() {
        let master = MockMaster::start().await;
        master.set_pull("orders", json!([{"id": 1}]));
        master.fail_pulls("orders", 2);

        let records = client_for(&master.base_url).pull("orders", since()).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(master.pull_requests("orders"), 3);
    }

    #[tokio::test]
    async fn test_pull_gives_up_after_retries() {
        let master = MockMaster::start().await;
        master.fail_pulls("orders", 10);

        let err = client_for(&master.base_url)
            .pull("orders", since())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::HttpStatus { status: 503, .. }));
        assert_eq!(master.pull_requests("orders"), 3);
    }

    #[tokio::test]
    async fn test_push_posts_batch_and_reports_status() {
        let master = MockMaster::start().await;
        let client = client_for(&master.base_url);

        client
            .push("orders", &[json!({"id": 1, "action": "create"})])
            .await
            .unwrap();
        assert_eq!(master.pushed("orders").len(), 1);

        master.fail_pushes("orders");
        let err = client.push("orders", &[json!({"id": 2})]).await.unwrap_err();
        assert!(matches!(err, SyncError::HttpStatus { status: 500, .. }));
        assert!(err.is_transport_error());
    }

    #[tokio::test]
    async fn test_unreachable_master_is_connection_failure() {
        let client = client_for("http://127.0.0.1:1/api");
        let err = client.push("orders", &[]).await.unwrap_err();
        assert!(matches!(err, SyncError::ConnectionFailed(_)));
    }
}
