//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Data                │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  InvalidRecord          │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  SerializationFailed    │ │
//! │  │  ConfigLoad     │  │  HttpStatus     │  │                         │ │
//! │  │                 │  │  Malformed      │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Database     │  │    Registry     │                              │
//! │  │                 │  │                 │                              │
//! │  │  DatabaseError  │  │  EntityUnavail. │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Inside a cycle these never escape: each one is folded into the failing
//! entity type's [`EntityOutcome`](crate::report::EntityOutcome).

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid master base URL.
    #[error("Invalid master URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Could not reach the master.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A call to the master exceeded the configured timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The master answered with a non-success status.
    #[error("Master returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The master's response body was not what the endpoint promises.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    // =========================================================================
    // Data Errors
    // =========================================================================
    /// A record could not be used (no id, not an object).
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Failed to serialize an outbound payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Database & Registry Errors
    // =========================================================================
    /// Local storage failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// An entity type has no usable backing table.
    #[error("Entity type '{0}' is not available")]
    EntityUnavailable(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<syncline_db::DbError> for SyncError {
    fn from(err: syncline_db::DbError) -> Self {
        match err {
            syncline_db::DbError::Invalid(e) => SyncError::InvalidRecord(e.to_string()),
            syncline_db::DbError::TableMissing(table) => SyncError::EntityUnavailable(table),
            other => SyncError::DatabaseError(other.to_string()),
        }
    }
}

impl From<syncline_core::CoreError> for SyncError {
    fn from(err: syncline_core::CoreError) -> Self {
        SyncError::InvalidRecord(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the same request may succeed if simply repeated.
    ///
    /// ## Retryable Errors
    /// - Connection failures
    /// - Timeouts
    /// - 5xx responses and 429
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_) | SyncError::Timeout(_) => true,
            SyncError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_) | SyncError::InvalidUrl(_) | SyncError::ConfigLoadFailed(_)
        )
    }

    /// Returns true if the failure happened talking to the master.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Timeout(_)
                | SyncError::HttpStatus { .. }
                | SyncError::MalformedResponse(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("refused".into()).is_retryable());
        assert!(SyncError::Timeout(25).is_retryable());
        assert!(SyncError::HttpStatus { status: 503, body: String::new() }.is_retryable());

        assert!(!SyncError::HttpStatus { status: 404, body: String::new() }.is_retryable());
        assert!(!SyncError::MalformedResponse("not an array".into()).is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
    }

    #[test]
    fn test_categories() {
        assert!(SyncError::InvalidUrl("x".into()).is_config_error());
        assert!(SyncError::MalformedResponse("x".into()).is_transport_error());
        assert!(!SyncError::DatabaseError("x".into()).is_transport_error());
    }

    #[test]
    fn test_db_errors_map_to_categories() {
        let missing: SyncError = syncline_db::DbError::TableMissing("orders".into()).into();
        assert!(matches!(missing, SyncError::EntityUnavailable(ref t) if t == "orders"));

        let invalid: SyncError = syncline_core::CoreError::MissingRecordId { field: "id".into() }.into();
        assert!(matches!(invalid, SyncError::InvalidRecord(_)));
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::HttpStatus {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.to_string(), "Master returned HTTP 500: boom");
    }
}
