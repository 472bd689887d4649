//! Core types for the xray decision trail
//!
//! # Modules
//!
//! - `config`: Environment file loading and typed getters
//! - `error`: Validation error shared by every layer
//! - `model`: Stored records (Execution → Step → Evaluation)
//! - `request`: Creation/update requests and their validation

pub mod config;
pub mod error;
pub mod model;
pub mod request;

// Re-exports
pub use error::ValidationError;
pub use model::{
    Evaluation, Execution, ExecutionStatus, Metadata, Rule, Step, StepOutput, DEFAULT_STEP_TYPE,
};
pub use request::{
    CreateEvaluationRequest, CreateExecutionRequest, CreateStepRequest, ListExecutionsQuery,
    UpdateExecutionRequest, UpdateStepRequest, Validate, DEFAULT_LIST_LIMIT,
};
