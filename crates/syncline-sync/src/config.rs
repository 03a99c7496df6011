//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SYNCLINE_ROLE=slave                                                │
//! │     SYNCLINE_BASE_URL=https://master.example.com/api/sync              │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/syncline/sync.toml (Linux)                               │
//! │     ~/Library/Application Support/com.syncline.syncline/sync.toml      │
//! │     or an explicit --config path                                       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     role = slave, 25s timeout, 7 day retention                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [sync]
//! role = "slave"  # master | slave
//! base_url = "https://master.example.com/api/sync"
//! timeout_secs = 25
//!
//! [connectivity]
//! endpoints = ["1.1.1.1:53", "8.8.8.8:53"]
//! timeout_secs = 3
//!
//! [change_log]
//! enabled = true
//! retention_days = 7
//!
//! [entities]
//! include = []      # empty: every user table
//! deny = ["users"]
//!
//! [database]
//! path = "syncline.db"
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use syncline_core::timestamp;

/// Hard cap on the connectivity probe timeout.
pub const MAX_PROBE_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Sync Role
// =============================================================================

/// The role of this node.
///
/// Only a slave runs sync cycles. The master is the authoritative side that
/// serves the pull and push endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRole {
    Master,

    #[default]
    Slave,
}

impl SyncRole {
    /// Returns true if this node runs scheduled cycles.
    pub fn runs_cycles(&self) -> bool {
        matches!(self, SyncRole::Slave)
    }
}

impl std::fmt::Display for SyncRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncRole::Master => write!(f, "master"),
            SyncRole::Slave => write!(f, "slave"),
        }
    }
}

impl std::str::FromStr for SyncRole {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "master" => Ok(SyncRole::Master),
            "slave" => Ok(SyncRole::Slave),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync role: '{}'. Valid options: master, slave",
                other
            ))),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Role of this node.
    #[serde(default)]
    pub role: SyncRole,

    /// Base URL of the master's sync endpoints.
    /// Required for the slave role.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Timeout for each network call (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Extra attempts for a pull GET that failed with a retryable error.
    #[serde(default = "default_pull_retries")]
    pub pull_retries: u32,

    /// Initial backoff between pull retries (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff between pull retries (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Cursor used for an entity type that has never been pulled.
    #[serde(default = "default_start_date")]
    pub default_start_date: String,

    /// Entries left in `syncing` longer than this are treated as failed.
    #[serde(default = "default_stale_syncing")]
    pub stale_syncing_secs: u64,
}

fn default_timeout() -> u64 {
    25
}
fn default_pull_retries() -> u32 {
    2
}
fn default_initial_backoff() -> u64 {
    250
}
fn default_max_backoff() -> u64 {
    5
}
fn default_start_date() -> String {
    "2000-01-01T00:00:00Z".to_string()
}
fn default_stale_syncing() -> u64 {
    300
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            role: SyncRole::default(),
            base_url: None,
            timeout_secs: default_timeout(),
            pull_retries: default_pull_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            default_start_date: default_start_date(),
            stale_syncing_secs: default_stale_syncing(),
        }
    }
}

// =============================================================================
// Connectivity Settings
// =============================================================================

/// Reachability probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivitySettings {
    /// `host:port` endpoints tried in order; first success wins.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Per-endpoint connect timeout (seconds).
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoints() -> Vec<String> {
    vec!["1.1.1.1:53".to_string(), "8.8.8.8:53".to_string()]
}

fn default_probe_timeout() -> u64 {
    3
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        ConnectivitySettings {
            endpoints: default_endpoints(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

// =============================================================================
// Change Log Settings
// =============================================================================

/// Change log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLogSettings {
    /// Record local mutations. When false the change hook is a no-op.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Completed entries older than this are swept.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    7
}

impl Default for ChangeLogSettings {
    fn default() -> Self {
        ChangeLogSettings {
            enabled: true,
            retention_days: default_retention_days(),
        }
    }
}

// =============================================================================
// Entity & Database Settings
// =============================================================================

/// Which entity types take part in sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySettings {
    /// Explicit registration list. Empty means every user table.
    #[serde(default)]
    pub include: Vec<String>,

    /// Entity types never synced.
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Local database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("syncline.db")
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub connectivity: ConnectivitySettings,

    #[serde(default)]
    pub change_log: ChangeLogSettings,

    #[serde(default)]
    pub entities: EntitySettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document. Missing sections and keys take defaults.
    pub fn from_toml(contents: &str) -> SyncResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        match self.sync.base_url.as_deref() {
            Some(raw) => {
                let url = url::Url::parse(raw)?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(SyncError::InvalidUrl(format!(
                        "Master URL must use http or https, got: {}",
                        raw
                    )));
                }
            }
            None if self.sync.role == SyncRole::Slave => {
                return Err(SyncError::InvalidConfig(
                    "sync.base_url is required for the slave role".into(),
                ));
            }
            None => {}
        }

        if self.sync.timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.timeout_secs must be greater than 0".into(),
            ));
        }

        if self.connectivity.endpoints.is_empty() {
            return Err(SyncError::InvalidConfig(
                "connectivity.endpoints must list at least one host:port".into(),
            ));
        }

        if self.connectivity.timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "connectivity.timeout_secs must be greater than 0".into(),
            ));
        }

        if self.connectivity.timeout_secs > default_probe_timeout() {
            warn!(
                timeout_secs = self.connectivity.timeout_secs,
                cap = MAX_PROBE_TIMEOUT_SECS,
                "Connectivity probe timeout above 3s slows down offline cycles"
            );
        }

        if self.change_log.retention_days == 0 {
            return Err(SyncError::InvalidConfig(
                "change_log.retention_days must be at least 1".into(),
            ));
        }

        self.default_start()?;

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup (the process environment in
    /// production).
    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(role) = lookup("SYNCLINE_ROLE") {
            match role.parse() {
                Ok(parsed) => {
                    debug!(role = %role, "Overriding sync role from environment");
                    self.sync.role = parsed;
                }
                Err(_) => warn!(role = %role, "Unknown sync role in environment"),
            }
        }

        if let Some(url) = lookup("SYNCLINE_BASE_URL") {
            debug!(url = %url, "Overriding master URL from environment");
            self.sync.base_url = Some(url);
        }

        if let Some(timeout) = lookup("SYNCLINE_TIMEOUT_SECS") {
            if let Ok(t) = timeout.parse::<u64>() {
                self.sync.timeout_secs = t;
            }
        }

        if let Some(enabled) = lookup("SYNCLINE_CHANGE_LOG_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.change_log.enabled = true,
                "0" | "false" | "no" | "off" => self.change_log.enabled = false,
                _ => warn!(value = %enabled, "Unknown change log flag in environment"),
            }
        }

        if let Some(path) = lookup("SYNCLINE_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }

        if let Some(days) = lookup("SYNCLINE_RETENTION_DAYS") {
            if let Ok(d) = days.parse::<u32>() {
                self.change_log.retention_days = d;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "syncline", "syncline")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the role of this node.
    pub fn role(&self) -> SyncRole {
        self.sync.role
    }

    /// Returns the master base URL if configured.
    pub fn base_url(&self) -> Option<&str> {
        self.sync.base_url.as_deref()
    }

    /// Per-call network timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.timeout_secs)
    }

    /// Per-endpoint probe timeout, capped at [`MAX_PROBE_TIMEOUT_SECS`].
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.connectivity.timeout_secs.min(MAX_PROBE_TIMEOUT_SECS))
    }

    /// Age after which a `syncing` entry is considered abandoned.
    pub fn stale_syncing_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.sync.stale_syncing_secs).unwrap_or(i64::MAX))
    }

    /// Parsed default start date for cursors.
    pub fn default_start(&self) -> SyncResult<DateTime<Utc>> {
        timestamp::parse_str(&self.sync.default_start_date).ok_or_else(|| {
            SyncError::InvalidConfig(format!(
                "sync.default_start_date is not a date: '{}'",
                self.sync.default_start_date
            ))
        })
    }
}
