//! Tracking client
//!
//! A `Tracker` records one execution at a time, with at most one open step.
//! All stateful operations take `&mut self`: a tracker is a sequential state
//! machine and overlapping calls on one instance do not compile. Call-order
//! mistakes are reported as `TrackerError::State` without contacting the
//! store.

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use xray_core::{
    CreateEvaluationRequest, CreateExecutionRequest, CreateStepRequest, Execution,
    ExecutionStatus, Metadata, Step, UpdateExecutionRequest, UpdateStepRequest,
};
use xray_store::{RecordKind, RecordStore, StoreError};

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::http_store::HttpStore;

pub struct Tracker<S: ?Sized> {
    pub(crate) store: Arc<S>,
    name: String,
    execution_id: Option<String>,
    current_step_id: Option<String>,
}

impl Tracker<HttpStore> {
    /// Tracker backed by the record API at `config.api_url`.
    pub fn connect(name: impl Into<String>, config: &TrackerConfig) -> Result<Self> {
        let store = HttpStore::new(config)?;
        Ok(Self::new(name, Arc::new(store)))
    }
}

impl<S: RecordStore + ?Sized> Tracker<S> {
    pub fn new(name: impl Into<String>, store: Arc<S>) -> Self {
        Self {
            store,
            name: name.into(),
            execution_id: None,
            current_step_id: None,
        }
    }

    /// Name given to every execution this tracker starts.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    pub fn current_step_id(&self) -> Option<&str> {
        self.current_step_id.as_deref()
    }

    #[instrument(skip_all, fields(tracker = %self.name))]
    pub async fn start_execution(&mut self, metadata: Option<Metadata>) -> Result<Execution> {
        if let Some(open) = &self.execution_id {
            return Err(TrackerError::state(
                "start_execution",
                format!("execution {} is still open", open),
            ));
        }

        let mut request = CreateExecutionRequest::new(self.name.clone());
        if let Some(metadata) = metadata {
            request = request.with_metadata(metadata);
        }

        let execution = self.store.create_execution(request).await?;
        info!(execution_id = %execution.execution_id, "Tracking execution");
        self.execution_id = Some(execution.execution_id.clone());
        Ok(execution)
    }

    #[instrument(skip_all, fields(tracker = %self.name, step = %request.name))]
    pub async fn start_step(&mut self, request: CreateStepRequest) -> Result<Step> {
        let execution_id = self
            .execution_id
            .clone()
            .ok_or_else(|| TrackerError::state("start_step", "no execution is open"))?;
        if let Some(open) = &self.current_step_id {
            return Err(TrackerError::state(
                "start_step",
                format!("step {} is still open", open),
            ));
        }

        let step = self.store.create_step(&execution_id, request).await?;
        self.current_step_id = Some(step.step_id.clone());
        Ok(step)
    }

    #[instrument(skip_all, fields(tracker = %self.name))]
    pub async fn record_evaluation(
        &mut self,
        entity_id: impl AsRef<str>,
        value: impl Into<Value>,
        passed: bool,
        reason: impl Into<String>,
    ) -> Result<Step> {
        let step_id = self
            .current_step_id
            .as_deref()
            .ok_or_else(|| TrackerError::state("record_evaluation", "no step is open"))?;

        let request = CreateEvaluationRequest::new(entity_id.as_ref(), value, passed, reason);
        Ok(self.store.append_evaluation(step_id, request).await?)
    }

    /// Close the open step, optionally recording its output.
    ///
    /// If the store reports the step as already ended, the step is released
    /// locally and the error is returned.
    #[instrument(skip_all, fields(tracker = %self.name))]
    pub async fn end_step(&mut self, output: Option<Metadata>) -> Result<Step> {
        let step_id = self
            .current_step_id
            .clone()
            .ok_or_else(|| TrackerError::state("end_step", "no step is open"))?;

        match self
            .store
            .update_step(&step_id, UpdateStepRequest::end(output))
            .await
        {
            Ok(step) => {
                self.current_step_id = None;
                Ok(step)
            }
            Err(err @ StoreError::InvalidState { kind: RecordKind::Step, .. }) => {
                warn!(%step_id, error = %err, "Step already ended in the store, releasing it");
                self.current_step_id = None;
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip_all, fields(tracker = %self.name, %status))]
    pub async fn end_execution(&mut self, status: ExecutionStatus) -> Result<Execution> {
        let execution_id = self
            .execution_id
            .clone()
            .ok_or_else(|| TrackerError::state("end_execution", "no execution is open"))?;
        if let Some(open) = &self.current_step_id {
            return Err(TrackerError::state(
                "end_execution",
                format!("step {} is still open", open),
            ));
        }

        match self
            .store
            .update_execution(&execution_id, UpdateExecutionRequest::end(status))
            .await
        {
            Ok(execution) => {
                info!(execution_id = %execution.execution_id, %status, "Execution finished");
                self.execution_id = None;
                Ok(execution)
            }
            Err(err @ StoreError::InvalidState { kind: RecordKind::Execution, .. }) => {
                warn!(%execution_id, error = %err, "Execution already ended in the store, releasing it");
                self.execution_id = None;
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Fetch the open execution with its steps so far.
    pub async fn current_execution(&self) -> Result<Execution> {
        let execution_id = self
            .execution_id
            .as_deref()
            .ok_or_else(|| TrackerError::state("current_execution", "no execution is open"))?;
        Ok(self.store.get_execution(execution_id).await?)
    }
}
