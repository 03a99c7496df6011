//! # Validation
//!
//! Checks applied before anything reaches SQL or the change log.
//!
//! Entity type names become table names in dynamically built statements, so
//! they are restricted to plain identifiers. Record ids are normalised to
//! text so the change log can key integer and string primary keys alike.

use serde_json::Value;

use crate::error::CoreError;
use crate::{Record, ID_FIELD};

/// Longest identifier accepted for tables and columns.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Validates a table, column or entity type name.
///
/// ## Rules
/// - 1 to 64 characters
/// - ASCII letters, digits and underscores only
/// - Must not start with a digit
/// - Must not use SQLite's reserved `sqlite_` prefix
pub fn validate_identifier(name: &str) -> Result<(), CoreError> {
    let invalid = || CoreError::InvalidIdentifier(name.to_string());

    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid());
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return Err(invalid()),
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid());
    }

    if name.to_ascii_lowercase().starts_with("sqlite_") {
        return Err(invalid());
    }

    Ok(())
}

/// Normalises a primary key value to its text form.
///
/// Strings are taken as-is (must be non-blank), integers are formatted.
/// Anything else has no usable identity.
pub fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Extracts the record's primary identifier as text.
pub fn record_id(record: &Record) -> Result<String, CoreError> {
    record
        .get(ID_FIELD)
        .and_then(id_to_string)
        .ok_or_else(|| CoreError::MissingRecordId {
            field: ID_FIELD.to_string(),
        })
}
