//! Scoped steps
//!
//! `Tracker::scoped_step` opens a step, runs a body with a `StepHandle`, and
//! always closes the step afterwards: on success, on error (with
//! `{"error": <message>}` merged into the output) and on panic (closed with
//! an error indicator before the panic resumes).

use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::warn;
use xray_core::{CreateEvaluationRequest, CreateStepRequest, Metadata, Step};
use xray_store::RecordStore;

use crate::error::{Result, TrackerError};
use crate::tracker::Tracker;

/// Handle to the open step, passed to the body of a scoped step.
pub struct StepHandle<S: ?Sized> {
    store: Arc<S>,
    step_id: String,
    output: Arc<Mutex<Option<Metadata>>>,
}

impl<S: ?Sized> Clone for StepHandle<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            step_id: self.step_id.clone(),
            output: Arc::clone(&self.output),
        }
    }
}

impl<S: RecordStore + ?Sized> StepHandle<S> {
    fn new(store: Arc<S>, step_id: String) -> Self {
        Self {
            store,
            step_id,
            output: Arc::new(Mutex::new(None)),
        }
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Record a verdict for `entity_id` and hand the condition back.
    ///
    /// Without a reason, "Evaluation passed" / "Evaluation failed" is used.
    pub async fn evaluate(
        &self,
        entity_id: impl Into<String>,
        value: impl Into<Value>,
        condition: bool,
        reason: Option<String>,
    ) -> Result<bool> {
        let reason = reason.unwrap_or_else(|| {
            if condition {
                "Evaluation passed".to_string()
            } else {
                "Evaluation failed".to_string()
            }
        });
        self.log_evaluation(entity_id, value, condition, reason)
            .await?;
        Ok(condition)
    }

    /// Record an evaluation with an explicit verdict and reason.
    pub async fn log_evaluation(
        &self,
        entity_id: impl Into<String>,
        value: impl Into<Value>,
        passed: bool,
        reason: impl Into<String>,
    ) -> Result<Step> {
        let request = CreateEvaluationRequest::new(entity_id, value, passed, reason);
        Ok(self.store.append_evaluation(&self.step_id, request).await?)
    }

    /// Stage the output recorded when the step closes. Replaces earlier output.
    pub fn set_output(&self, data: Metadata) {
        *self.lock_output() = Some(data);
    }

    fn take_output(&self) -> Option<Metadata> {
        self.lock_output().take()
    }

    fn lock_output(&self) -> std::sync::MutexGuard<'_, Option<Metadata>> {
        self.output.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: RecordStore + ?Sized> Tracker<S> {
    /// Run `body` inside a step that is closed however the body ends.
    ///
    /// The body's result or error is returned unchanged.
    pub async fn scoped_step<F, Fut, T, E>(&mut self, request: CreateStepRequest, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(StepHandle<S>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<TrackerError> + fmt::Display,
    {
        let step = self.start_step(request).await?;
        let handle = StepHandle::new(Arc::clone(&self.store), step.step_id);

        let outcome = AssertUnwindSafe(body(handle.clone())).catch_unwind().await;
        let output = handle.take_output();

        match outcome {
            Ok(Ok(value)) => {
                self.end_step(output).await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.close_with_error(output, err.to_string()).await;
                Err(err)
            }
            Err(payload) => {
                let message = format!("panic: {}", panic_message(payload.as_ref()));
                self.close_with_error(output, message).await;
                panic::resume_unwind(payload)
            }
        }
    }

    /// Close the open step with an error indicator; a failure to close is logged.
    async fn close_with_error(&mut self, output: Option<Metadata>, message: String) {
        let mut output = output.unwrap_or_default();
        output.insert("error".to_string(), Value::String(message));

        if let Err(close_err) = self.end_step(Some(output)).await {
            warn!(
                step_id = ?self.current_step_id(),
                error = %close_err,
                "Failed to close step after body error"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xray_core::{ExecutionStatus, UpdateStepRequest};
    use xray_store::MemoryStore;

    async fn open_tracker() -> (Arc<MemoryStore>, Tracker<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut tracker = Tracker::new("scoped", store.clone());
        tracker.start_execution(None).await.unwrap();
        (store, tracker)
    }

    #[tokio::test]
    async fn test_scoped_step_records_and_closes() {
        let (store, mut tracker) = open_tracker().await;

        let kept = tracker
            .scoped_step(CreateStepRequest::new("filter").step_type("filter"), |step| async move {
                let a = step.evaluate("A", json!({"rating": 4.5}), true, None).await?;
                let b = step
                    .evaluate("B", json!({"rating": 3.0}), false, Some("rating 3.0<4.0".into()))
                    .await?;
                step.set_output(json!({"passed": 1, "failed": 1}).as_object().cloned().unwrap());
                Ok::<_, TrackerError>(vec![a, b])
            })
            .await
            .unwrap();
        assert_eq!(kept, vec![true, false]);
        assert!(tracker.current_step_id().is_none());

        let execution = store
            .get_execution(tracker.execution_id().unwrap())
            .await
            .unwrap();
        let step = &execution.steps[0];
        assert!(step.is_ended());
        assert_eq!(step.evaluations[0].reason, "Evaluation passed");
        assert_eq!(step.evaluations[1].reason, "rating 3.0<4.0");
        assert_eq!(step.output.passed, Some(1));
    }

    #[tokio::test]
    async fn test_failing_body_closes_step_with_error() {
        let (store, mut tracker) = open_tracker().await;

        let err = tracker
            .scoped_step(CreateStepRequest::new("fetch"), |step| async move {
                step.set_output(json!({"partial": true}).as_object().cloned().unwrap());
                Err::<(), _>(TrackerError::state("fetch", "upstream unavailable"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "fetch: upstream unavailable");

        let execution = store
            .get_execution(tracker.execution_id().unwrap())
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        let step = &execution.steps[0];
        assert!(step.is_ended());
        assert_eq!(
            step.output.data_value("error"),
            Some(&json!("fetch: upstream unavailable"))
        );
        assert_eq!(step.output.data_value("partial"), Some(&json!(true)));

        // The tracker is free for the next step
        tracker
            .scoped_step(CreateStepRequest::new("retry"), |_step| async move {
                Ok::<_, TrackerError>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_panicking_body_closes_step() {
        let (store, mut tracker) = open_tracker().await;
        let execution_id = tracker.execution_id().unwrap().to_string();

        let result = AssertUnwindSafe(tracker.scoped_step(
            CreateStepRequest::new("explode"),
            |_step| async move {
                if true {
                    panic!("boom");
                }
                Ok::<(), TrackerError>(())
            },
        ))
        .catch_unwind()
        .await;
        assert!(result.is_err());

        let execution = store.get_execution(&execution_id).await.unwrap();
        let step = &execution.steps[0];
        assert!(step.is_ended());
        assert_eq!(step.output.data_value("error"), Some(&json!("panic: boom")));
    }

    #[tokio::test]
    async fn test_scoped_step_requires_open_execution() {
        let store = Arc::new(MemoryStore::new());
        let mut tracker = Tracker::new("idle", store);

        let err = tracker
            .scoped_step(CreateStepRequest::new("s"), |_step| async move {
                Ok::<_, TrackerError>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_state());
    }

    #[tokio::test]
    async fn test_step_closed_by_body_does_not_stay_open() {
        let (store, mut tracker) = open_tracker().await;
        let closer = store.clone();

        let err = tracker
            .scoped_step(CreateStepRequest::new("self-closing"), |step| async move {
                closer
                    .update_step(step.step_id(), UpdateStepRequest::end(None))
                    .await?;
                Ok::<_, TrackerError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Store(xray_store::StoreError::InvalidState { .. })
        ));
        assert!(tracker.current_step_id().is_none());

        tracker
            .scoped_step(CreateStepRequest::new("next"), |_step| async move {
                Ok::<_, TrackerError>(())
            })
            .await
            .unwrap();
        tracker.end_execution(ExecutionStatus::Completed).await.unwrap();
    }
}
