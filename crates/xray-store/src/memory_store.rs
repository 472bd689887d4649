//! In-memory record store
//!
//! Process-wide, ephemeral storage for the execution hierarchy. All records
//! live behind one `RwLock`; every mutation (including the read-modify-write
//! of a step's evaluation list) runs under the write guard, so concurrent
//! appends to one step are serialized and none are lost.

use crate::error::{RecordKind, Result, StoreError};
use crate::record_store::RecordStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use xray_core::{
    CreateEvaluationRequest, CreateExecutionRequest, CreateStepRequest, Evaluation, Execution,
    ListExecutionsQuery, Step, StepOutput, UpdateExecutionRequest,
    UpdateStepRequest, Validate, DEFAULT_LIST_LIMIT,
};

/// Store limits
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Limit applied when a list query asks for zero entries
    pub default_list_limit: usize,
    /// Hard cap on list results
    pub max_list_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_list_limit: DEFAULT_LIST_LIMIT,
            max_list_limit: 1000,
        }
    }
}

impl StoreConfig {
    /// Read limits from `XRAY_LIST_LIMIT` / `XRAY_MAX_LIST_LIMIT`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_list_limit = xray_core::config::get_config_int(
            "XRAY_MAX_LIST_LIMIT",
            defaults.max_list_limit as i64,
        )
        .max(1) as usize;
        let default_list_limit = xray_core::config::get_config_int(
            "XRAY_LIST_LIMIT",
            defaults.default_list_limit as i64,
        )
        .clamp(1, max_list_limit as i64) as usize;

        Self {
            default_list_limit,
            max_list_limit,
        }
    }

    fn effective_limit(&self, requested: usize) -> usize {
        match requested {
            0 => self.default_list_limit,
            n => n.min(self.max_list_limit),
        }
    }
}

/// Records guarded by a single lock
#[derive(Default)]
struct Records {
    executions: HashMap<String, Execution>,
    steps: HashMap<String, Step>,
    /// Creation sequence per execution, used to break `started_at` ties
    sequence: HashMap<String, u64>,
    next_sequence: u64,
}

impl Records {
    fn execution(&self, execution_id: &str) -> Result<&Execution> {
        self.executions
            .get(execution_id)
            .ok_or_else(|| StoreError::execution_not_found(execution_id))
    }

    fn step(&self, step_id: &str) -> Result<&Step> {
        self.steps
            .get(step_id)
            .ok_or_else(|| StoreError::step_not_found(step_id))
    }

    fn step_mut(&mut self, step_id: &str) -> Result<&mut Step> {
        self.steps
            .get_mut(step_id)
            .ok_or_else(|| StoreError::step_not_found(step_id))
    }

    /// Steps of `execution` in creation order.
    fn steps_of(&self, execution: &Execution) -> Vec<Step> {
        execution
            .step_ids
            .iter()
            .filter_map(|id| self.steps.get(id).cloned())
            .collect()
    }

    fn with_steps(&self, execution: &Execution) -> Execution {
        Execution {
            steps: self.steps_of(execution),
            ..execution.clone()
        }
    }
}

/// Ephemeral `RecordStore` backed by in-process maps
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
    config: StoreConfig,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            records: RwLock::new(Records::default()),
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of executions currently held.
    pub async fn execution_count(&self) -> usize {
        self.records.read().await.executions.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_execution(&self, request: CreateExecutionRequest) -> Result<Execution> {
        let execution = request.into_execution()?;

        let mut records = self.records.write().await;
        let sequence = records.next_sequence;
        records.next_sequence += 1;
        records
            .sequence
            .insert(execution.execution_id.clone(), sequence);
        records
            .executions
            .insert(execution.execution_id.clone(), execution.clone());

        info!(
            execution_id = %execution.execution_id,
            name = %execution.name,
            "Execution created"
        );
        Ok(execution)
    }

    async fn list_executions(&self, query: ListExecutionsQuery) -> Result<Vec<Execution>> {
        let limit = self.config.effective_limit(query.limit);
        let records = self.records.read().await;

        let mut executions: Vec<&Execution> = records.executions.values().collect();
        executions.sort_by(|a, b| {
            let seq = |e: &Execution| records.sequence.get(&e.execution_id).copied().unwrap_or(0);
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| seq(b).cmp(&seq(a)))
        });

        Ok(executions
            .into_iter()
            .take(limit)
            .map(|execution| {
                if query.include_steps {
                    records.with_steps(execution)
                } else {
                    execution.summary()
                }
            })
            .collect())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Execution> {
        let records = self.records.read().await;
        let execution = records.execution(execution_id)?;
        Ok(records.with_steps(execution))
    }

    async fn update_execution(
        &self,
        execution_id: &str,
        update: UpdateExecutionRequest,
    ) -> Result<Execution> {
        update.validate()?;

        let mut records = self.records.write().await;
        let execution = records
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::execution_not_found(execution_id))?;

        if execution.is_terminal() {
            warn!(execution_id, status = %execution.status, "Rejected update of ended execution");
            return Err(StoreError::invalid_state(
                RecordKind::Execution,
                execution_id,
                format!("already {}", execution.status),
            ));
        }

        if let Some(status) = update.status {
            execution.status = status;
            if status.is_terminal() {
                // ended_at is set exactly when the status leaves running
                execution.ended_at = Some(update.ended_at.unwrap_or_else(Utc::now));
                info!(execution_id, status = %status, "Execution ended");
            }
        }

        let execution = execution.clone();
        Ok(records.with_steps(&execution))
    }

    async fn create_step(&self, execution_id: &str, request: CreateStepRequest) -> Result<Step> {
        let mut records = self.records.write().await;
        let execution = records
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::execution_not_found(execution_id))?;

        if execution.is_terminal() {
            return Err(StoreError::invalid_state(
                RecordKind::Execution,
                execution_id,
                "cannot open a step in an ended execution",
            ));
        }

        let step = request.into_step(execution_id)?;
        execution.step_ids.push(step.step_id.clone());
        records.steps.insert(step.step_id.clone(), step.clone());

        info!(
            execution_id,
            step_id = %step.step_id,
            name = %step.name,
            step_type = %step.step_type,
            "Step opened"
        );
        Ok(step)
    }

    async fn get_step(&self, step_id: &str) -> Result<Step> {
        let records = self.records.read().await;
        records.step(step_id).cloned()
    }

    async fn list_steps(&self, execution_id: &str) -> Result<Vec<Step>> {
        let records = self.records.read().await;
        let execution = records.execution(execution_id)?;
        Ok(records.steps_of(execution))
    }

    async fn update_step(&self, step_id: &str, update: UpdateStepRequest) -> Result<Step> {
        update.validate()?;

        let mut records = self.records.write().await;
        let step = records.step_mut(step_id)?;

        if step.is_ended() {
            warn!(step_id, "Rejected update of ended step");
            return Err(StoreError::invalid_state(
                RecordKind::Step,
                step_id,
                "step has already ended",
            ));
        }

        if let Some(output) = update.output {
            step.output = StepOutput::from_map(output);
        }
        if let Some(ended_at) = update.ended_at {
            step.ended_at = Some(ended_at);
            info!(
                step_id,
                execution_id = %step.execution_id,
                evaluations = step.evaluations.len(),
                "Step closed"
            );
        }

        Ok(step.clone())
    }

    async fn append_evaluation(
        &self,
        step_id: &str,
        request: CreateEvaluationRequest,
    ) -> Result<Step> {
        let evaluation = Evaluation::try_from(request)?;

        let mut records = self.records.write().await;
        let step = records.step_mut(step_id)?;

        if step.is_ended() {
            warn!(step_id, entity_id = %evaluation.entity_id, "Rejected late evaluation");
            return Err(StoreError::invalid_state(
                RecordKind::Step,
                step_id,
                "cannot append evaluations to an ended step",
            ));
        }

        debug!(
            step_id,
            entity_id = %evaluation.entity_id,
            passed = evaluation.passed,
            "Evaluation appended"
        );
        step.evaluations.push(evaluation);
        Ok(step.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xray_core::{ExecutionStatus, Metadata};

    fn input(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_execution_lifecycle() {
        let store = MemoryStore::new();

        // Create
        let execution = store
            .create_execution(CreateExecutionRequest::new("e1"))
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.ended_at.is_none());

        // End
        let ended = store
            .update_execution(
                &execution.execution_id,
                UpdateExecutionRequest::end(ExecutionStatus::Completed),
            )
            .await
            .unwrap();
        assert_eq!(ended.status, ExecutionStatus::Completed);
        assert!(ended.ended_at.is_some());

        // Terminal
        let err = store
            .update_execution(
                &execution.execution_id,
                UpdateExecutionRequest::end(ExecutionStatus::Failed),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { .. }));

        let stored = store.get_execution(&execution.execution_id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert_eq!(stored.ended_at, ended.ended_at);
    }

    #[tokio::test]
    async fn test_terminal_status_without_timestamp_sets_ended_at() {
        let store = MemoryStore::new();
        let execution = store
            .create_execution(CreateExecutionRequest::new("e1"))
            .await
            .unwrap();

        let update = UpdateExecutionRequest {
            status: Some(ExecutionStatus::Failed),
            ended_at: None,
        };
        let ended = store
            .update_execution(&execution.execution_id, update)
            .await
            .unwrap();
        assert_eq!(ended.status, ExecutionStatus::Failed);
        assert!(ended.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_running_status_update_is_a_no_op() {
        let store = MemoryStore::new();
        let execution = store
            .create_execution(CreateExecutionRequest::new("e1"))
            .await
            .unwrap();

        let update = UpdateExecutionRequest {
            status: Some(ExecutionStatus::Running),
            ended_at: None,
        };
        let same = store
            .update_execution(&execution.execution_id, update)
            .await
            .unwrap();
        assert_eq!(same.status, ExecutionStatus::Running);
        assert!(same.ended_at.is_none());
    }

    #[tokio::test]
    async fn test_step_output_then_close() {
        let store = MemoryStore::new();
        let execution = store
            .create_execution(CreateExecutionRequest::new("e1"))
            .await
            .unwrap();
        let step = store
            .create_step(
                &execution.execution_id,
                CreateStepRequest::new("filter")
                    .step_type("filter")
                    .input(input(json!({"min": 4.0}))),
            )
            .await
            .unwrap();

        // Output only: step stays open
        let staged = store
            .update_step(
                &step.step_id,
                UpdateStepRequest {
                    output: Some(input(json!({"passed": 1}))),
                    ended_at: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(staged.output.passed, Some(1));
        assert!(!staged.is_ended());

        let err = store
            .update_step(&step.step_id, UpdateStepRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        let closed = store
            .update_step(&step.step_id, UpdateStepRequest::end(None))
            .await
            .unwrap();
        assert!(closed.is_ended());
        assert_eq!(closed.output.passed, Some(1));
        assert_eq!(closed.input, input(json!({"min": 4.0})));
    }

    #[test]
    fn test_effective_limit() {
        let config = StoreConfig {
            default_list_limit: 10,
            max_list_limit: 50,
        };
        assert_eq!(config.effective_limit(0), 10);
        assert_eq!(config.effective_limit(5), 5);
        assert_eq!(config.effective_limit(500), 50);
    }
}
