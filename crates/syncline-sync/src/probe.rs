//! # Connectivity Probe
//!
//! Cheap reachability check run once per cycle, before any sync traffic.
//!
//! ```text
//! endpoints: ["1.1.1.1:53", "8.8.8.8:53"]
//!
//!   connect 1.1.1.1:53  (≤ timeout) ── ok ──► online
//!        │ fail/timeout
//!        ▼
//!   connect 8.8.8.8:53  (≤ timeout) ── ok ──► online
//!        │ fail/timeout
//!        ▼
//!     offline  → cycle postponed, nothing touched
//! ```
//!
//! A wrong answer here is harmless: a cycle that runs while the master is
//! unreachable fails per entity type and retries next time.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::config::SyncConfig;

/// TCP reachability probe over an ordered endpoint list.
#[derive(Debug, Clone)]
pub struct ConnectivityProbe {
    endpoints: Vec<String>,
    timeout: Duration,
}

impl ConnectivityProbe {
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Self {
        ConnectivityProbe { endpoints, timeout }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.connectivity.endpoints.clone(), config.probe_timeout())
    }

    /// Returns true as soon as one endpoint accepts a TCP connection.
    pub async fn is_online(&self) -> bool {
        for endpoint in &self.endpoints {
            match timeout(self.timeout, TcpStream::connect(endpoint.as_str())).await {
                Ok(Ok(_)) => {
                    debug!(endpoint = %endpoint, "Connectivity probe succeeded");
                    return true;
                }
                Ok(Err(e)) => {
                    debug!(endpoint = %endpoint, error = %e, "Connectivity probe failed");
                }
                Err(_) => {
                    debug!(
                        endpoint = %endpoint,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Connectivity probe timed out"
                    );
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_offline_when_every_endpoint_fails() {
        let probe = ConnectivityProbe::new(
            vec!["127.0.0.1:1".into(), "not a host".into()],
            Duration::from_millis(500),
        );
        assert!(!probe.is_online().await);
    }

    #[tokio::test]
    async fn test_no_endpoints_is_offline() {
        let probe = ConnectivityProbe::new(Vec::new(), Duration::from_millis(500));
        assert!(!probe.is_online().await);
    }

    #[tokio::test]
    async fn test_first_reachable_endpoint_wins() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = ConnectivityProbe::new(
            vec!["127.0.0.1:1".into(), addr.to_string()],
            Duration::from_secs(1),
        );
        assert!(probe.is_online().await);
    }
}
