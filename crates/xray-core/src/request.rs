//! Creation and update requests
//!
//! Requests carry no identifiers or timestamps. Turning a request into a
//! record is a pure, fallible conversion; the `Validate` trait exposes the
//! same checks on their own so a client can run (or skip) them before a
//! round-trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::model::{
    default_step_type, new_id, Evaluation, Execution, ExecutionStatus, Metadata, Rule, Step,
    StepOutput,
};

/// Number of executions returned by a list call that does not set a limit.
pub const DEFAULT_LIST_LIMIT: usize = 100;

fn default_list_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::empty(field));
    }
    Ok(())
}

/// Pure request validation.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Request to create a new execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreateExecutionRequest {
    pub name: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl CreateExecutionRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn into_execution(self) -> Result<Execution, ValidationError> {
        self.validate()?;
        Ok(Execution::new(self.name, self.metadata.unwrap_or_default()))
    }
}

impl Validate for CreateExecutionRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("name", &self.name)
    }
}

/// Request to open a new step inside an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateStepRequest {
    pub name: String,
    #[serde(rename = "type", default = "default_step_type")]
    pub step_type: String,
    #[serde(default)]
    pub input: Metadata,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl CreateStepRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step_type: default_step_type(),
            input: Metadata::new(),
            rules: Vec::new(),
        }
    }

    pub fn step_type(mut self, step_type: impl Into<String>) -> Self {
        self.step_type = step_type.into();
        self
    }

    pub fn input(mut self, input: Metadata) -> Self {
        self.input = input;
        self
    }

    pub fn rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    /// Build the stored step for `execution_id`, stamped with the current time.
    pub fn into_step(self, execution_id: &str) -> Result<Step, ValidationError> {
        self.validate()?;
        Ok(Step {
            step_id: new_id(),
            execution_id: execution_id.to_string(),
            name: self.name,
            step_type: self.step_type,
            input: self.input,
            rules: self.rules,
            evaluations: Vec::new(),
            output: StepOutput::default(),
            started_at: Utc::now(),
            ended_at: None,
        })
    }
}

impl Validate for CreateStepRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("name", &self.name)?;
        require_non_empty("type", &self.step_type)
    }
}

/// Request to append an evaluation to an open step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateEvaluationRequest {
    pub entity_id: String,
    #[serde(default)]
    pub value: Value,
    pub passed: bool,
    /// Mandatory human-readable explanation of the verdict
    #[serde(default)]
    pub reason: String,
}

impl CreateEvaluationRequest {
    pub fn new(
        entity_id: impl Into<String>,
        value: impl Into<Value>,
        passed: bool,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            value: value.into(),
            passed,
            reason: reason.into(),
        }
    }
}

impl Validate for CreateEvaluationRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("reason", &self.reason)
    }
}

impl TryFrom<CreateEvaluationRequest> for Evaluation {
    type Error = ValidationError;

    fn try_from(request: CreateEvaluationRequest) -> Result<Self, Self::Error> {
        request.validate()?;
        Ok(Evaluation {
            entity_id: request.entity_id,
            value: request.value,
            passed: request.passed,
            reason: request.reason,
        })
    }
}

/// Partial update of a step. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UpdateStepRequest {
    #[serde(default)]
    pub output: Option<Metadata>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

impl UpdateStepRequest {
    /// Close the step now with the given output.
    pub fn end(output: Option<Metadata>) -> Self {
        Self {
            output,
            ended_at: Some(Utc::now()),
        }
    }
}

impl Validate for UpdateStepRequest {
    /// An update must change something.
    fn validate(&self) -> Result<(), ValidationError> {
        if self.output.is_none() && self.ended_at.is_none() {
            return Err(ValidationError::new(
                "update",
                "requires output or ended_at",
            ));
        }
        Ok(())
    }
}

/// Partial update of an execution, carried as query parameters over HTTP.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UpdateExecutionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl UpdateExecutionRequest {
    /// Finish the execution now with a terminal status.
    pub fn end(status: ExecutionStatus) -> Self {
        Self {
            status: Some(status),
            ended_at: Some(Utc::now()),
        }
    }
}

impl Validate for UpdateExecutionRequest {
    /// `ended_at` is only meaningful together with a terminal status.
    fn validate(&self) -> Result<(), ValidationError> {
        match (self.status, self.ended_at) {
            (Some(ExecutionStatus::Running), Some(_)) => Err(ValidationError::new(
                "ended_at",
                "cannot be set on a running execution",
            )),
            (None, Some(_)) => Err(ValidationError::new(
                "ended_at",
                "requires a terminal status",
            )),
            _ => Ok(()),
        }
    }
}

/// Query for listing executions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListExecutionsQuery {
    #[serde(default = "default_list_limit")]
    pub limit: usize,
    /// Include nested steps and evaluations in each execution
    #[serde(default)]
    pub include_steps: bool,
}

impl Default for ListExecutionsQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIST_LIMIT,
            include_steps: false,
        }
    }
}

impl ListExecutionsQuery {
    pub fn limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }
}
