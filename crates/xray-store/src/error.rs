use std::fmt;
use thiserror::Error;
use xray_core::ValidationError;

/// Kind of record an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Execution,
    Step,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Execution => f.write_str("execution"),
            RecordKind::Step => f.write_str("step"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),

    /// Mutation of a record that has already ended
    #[error("{kind} {id} is terminal: {message}")]
    InvalidState {
        kind: RecordKind,
        id: String,
        message: String,
    },

    /// Network or HTTP failure talking to a remote store
    #[error("transport error during {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    pub fn execution_not_found(id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind: RecordKind::Execution,
            id: id.into(),
        }
    }

    pub fn step_not_found(id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind: RecordKind::Step,
            id: id.into(),
        }
    }

    pub fn invalid_state(kind: RecordKind, id: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::InvalidState {
            kind,
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn transport(
        operation: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        StoreError::Transport {
            operation,
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = StoreError::step_not_found("s-1");
        assert_eq!(err.to_string(), "step not found: s-1");
        assert!(err.is_not_found());

        let err = StoreError::invalid_state(RecordKind::Execution, "e-1", "already ended");
        assert_eq!(err.to_string(), "execution e-1 is terminal: already ended");

        let err = StoreError::transport("get_step", "connection refused");
        assert_eq!(
            err.to_string(),
            "transport error during get_step: connection refused"
        );
    }

    #[test]
    fn test_validation_converts_to_invalid_argument() {
        let err: StoreError = ValidationError::empty("reason").into();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert_eq!(err.to_string(), "invalid argument: invalid reason: must not be empty");
    }
}
