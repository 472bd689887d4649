use thiserror::Error;
use xray_core::ValidationError;
use xray_store::StoreError;

/// Errors surfaced by the tracking client and its adapters
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Operation called out of order; raised locally without contacting the store
    #[error("{operation}: {message}")]
    State {
        operation: &'static str,
        message: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrackerError {
    pub fn state(operation: &'static str, message: impl Into<String>) -> Self {
        TrackerError::State {
            operation,
            message: message.into(),
        }
    }

    pub fn is_state(&self) -> bool {
        matches!(self, TrackerError::State { .. })
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
