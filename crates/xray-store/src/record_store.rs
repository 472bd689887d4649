use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use xray_core::{
    CreateEvaluationRequest, CreateExecutionRequest, CreateStepRequest, Execution,
    ListExecutionsQuery, Step, UpdateExecutionRequest, UpdateStepRequest,
};

/// Storage contract for the Execution → Step → Evaluation hierarchy.
///
/// ## Mutation semantics
///
/// Every mutating call is atomic with respect to readers: a reader never sees
/// a partially applied update. `append_evaluation` on the same step from
/// concurrent callers must retain every evaluation exactly once, in the order
/// the store serializes the writes.
///
/// ## Terminal records
///
/// Once an execution or step has `ended_at` set it is terminal. Updating it,
/// appending evaluations to an ended step, or opening a step under an ended
/// execution fails with `StoreError::InvalidState`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a running execution with an empty step list.
    async fn create_execution(&self, request: CreateExecutionRequest) -> Result<Execution>;

    /// Most recently started first, at most `query.limit` entries.
    async fn list_executions(&self, query: ListExecutionsQuery) -> Result<Vec<Execution>>;

    /// Execution with nested steps and evaluations.
    async fn get_execution(&self, execution_id: &str) -> Result<Execution>;

    /// Partial update; only fields present in `update` change.
    async fn update_execution(
        &self,
        execution_id: &str,
        update: UpdateExecutionRequest,
    ) -> Result<Execution>;

    /// Open a step and append it to the parent's step list.
    async fn create_step(&self, execution_id: &str, request: CreateStepRequest) -> Result<Step>;

    async fn get_step(&self, step_id: &str) -> Result<Step>;

    /// Steps of an execution in creation order.
    async fn list_steps(&self, execution_id: &str) -> Result<Vec<Step>>;

    /// Partial update; only fields present in `update` change.
    async fn update_step(&self, step_id: &str, update: UpdateStepRequest) -> Result<Step>;

    /// Append one evaluation; returns the step including the new entry.
    async fn append_evaluation(
        &self,
        step_id: &str,
        request: CreateEvaluationRequest,
    ) -> Result<Step>;
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    async fn create_execution(&self, request: CreateExecutionRequest) -> Result<Execution> {
        (**self).create_execution(request).await
    }

    async fn list_executions(&self, query: ListExecutionsQuery) -> Result<Vec<Execution>> {
        (**self).list_executions(query).await
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Execution> {
        (**self).get_execution(execution_id).await
    }

    async fn update_execution(
        &self,
        execution_id: &str,
        update: UpdateExecutionRequest,
    ) -> Result<Execution> {
        (**self).update_execution(execution_id, update).await
    }

    async fn create_step(&self, execution_id: &str, request: CreateStepRequest) -> Result<Step> {
        (**self).create_step(execution_id, request).await
    }

    async fn get_step(&self, step_id: &str) -> Result<Step> {
        (**self).get_step(step_id).await
    }

    async fn list_steps(&self, execution_id: &str) -> Result<Vec<Step>> {
        (**self).list_steps(execution_id).await
    }

    async fn update_step(&self, step_id: &str, update: UpdateStepRequest) -> Result<Step> {
        (**self).update_step(step_id, update).await
    }

    async fn append_evaluation(
        &self,
        step_id: &str,
        request: CreateEvaluationRequest,
    ) -> Result<Step> {
        (**self).append_evaluation(step_id, request).await
    }
}
