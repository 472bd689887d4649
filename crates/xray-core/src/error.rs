//! Validation errors

use thiserror::Error;

/// A creation or update request was rejected before reaching a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Error for a required string field that was empty or whitespace.
    pub fn empty(field: impl Into<String>) -> Self {
        Self::new(field, "must not be empty")
    }
}
