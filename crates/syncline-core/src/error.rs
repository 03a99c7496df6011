//! # Error Types
//!
//! Domain-specific error types for syncline-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  syncline-core errors (this file)                                      │
//! │  └── CoreError        - Parsing and validation failures                │
//! │                                                                         │
//! │  syncline-db errors (separate crate)                                   │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  syncline-sync errors (separate crate)                                 │
//! │  └── SyncError        - Config, transport and cycle failures           │
//! │                                                                         │
//! │  Flow: CoreError → DbError → SyncError → per-entity result             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Core rule and validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Unknown change action string (expected create, update or delete).
    #[error("Unknown change action: '{0}'")]
    InvalidAction(String),

    /// Unknown change status string.
    #[error("Unknown change status: '{0}'")]
    InvalidStatus(String),

    /// A record arrived without a usable primary identifier.
    ///
    /// ## When This Occurs
    /// - `id` field absent
    /// - `id` is null, an empty string, or a non-scalar value
    #[error("Record has no usable '{field}' field")]
    MissingRecordId { field: String },

    /// A table, column or entity type name is not a safe SQL identifier.
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::MissingRecordId { field: "id".into() };
        assert_eq!(err.to_string(), "Record has no usable 'id' field");

        let err = CoreError::InvalidIdentifier("drop table".into());
        assert!(err.to_string().contains("drop table"));
    }
}
