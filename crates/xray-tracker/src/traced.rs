//! Function wrapping
//!
//! `Traced` wraps an async function of one argument (use a tuple for several)
//! so that every call is recorded as one step of the shared tracker's open
//! execution. The function's value and error pass through unchanged.

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use xray_core::{CreateEvaluationRequest, CreateStepRequest, Metadata, DEFAULT_STEP_TYPE};
use xray_store::RecordStore;

use crate::error::TrackerError;
use crate::tracker::Tracker;

/// Tracker shared between wrapped functions.
///
/// A call made while another call holds the tracker fails with
/// `TrackerError::State` instead of waiting.
pub type SharedTracker<S> = Arc<Mutex<Tracker<S>>>;

pub fn shared<S: RecordStore + ?Sized>(tracker: Tracker<S>) -> SharedTracker<S> {
    Arc::new(Mutex::new(tracker))
}

type WrappedFn<A, R, E> = Box<dyn Fn(A) -> BoxFuture<'static, Result<R, E>> + Send + Sync>;
type InputExtractor<A> = Box<dyn Fn(&A) -> Metadata + Send + Sync>;
type OutputExtractor<R> = Box<dyn Fn(&R) -> Metadata + Send + Sync>;
type EvaluationExtractor<R> = Box<dyn Fn(&R) -> Vec<CreateEvaluationRequest> + Send + Sync>;

pub struct Traced<S: ?Sized, A, R, E> {
    tracker: SharedTracker<S>,
    name: String,
    step_type: String,
    func: WrappedFn<A, R, E>,
    input: Option<InputExtractor<A>>,
    output: Option<OutputExtractor<R>>,
    evaluations: Option<EvaluationExtractor<R>>,
}

impl<S, A, R, E> Traced<S, A, R, E>
where
    S: RecordStore + ?Sized,
    A: Serialize,
    R: Serialize,
    E: From<TrackerError> + fmt::Display,
{
    /// Wrap `func`; the step is named after the function.
    pub fn new<F, Fut>(tracker: SharedTracker<S>, func: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        Self {
            tracker,
            name: function_name::<F>(),
            step_type: DEFAULT_STEP_TYPE.to_string(),
            func: Box::new(move |args| func(args).boxed()),
            input: None,
            output: None,
            evaluations: None,
        }
    }

    /// Step name; required for closures, which have no useful type name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn step_type(mut self, step_type: impl Into<String>) -> Self {
        self.step_type = step_type.into();
        self
    }

    pub fn input_with(mut self, extract: impl Fn(&A) -> Metadata + Send + Sync + 'static) -> Self {
        self.input = Some(Box::new(extract));
        self
    }

    pub fn output_with(mut self, extract: impl Fn(&R) -> Metadata + Send + Sync + 'static) -> Self {
        self.output = Some(Box::new(extract));
        self
    }

    /// Derive evaluations from the return value; they are recorded before the step closes.
    pub fn evaluations_with(
        mut self,
        extract: impl Fn(&R) -> Vec<CreateEvaluationRequest> + Send + Sync + 'static,
    ) -> Self {
        self.evaluations = Some(Box::new(extract));
        self
    }

    pub fn step_name(&self) -> &str {
        &self.name
    }

    /// Invoke the wrapped function inside a step.
    pub async fn call(&self, args: A) -> Result<R, E> {
        let mut tracker = self.tracker.try_lock().map_err(|_| {
            TrackerError::state(
                "traced_call",
                format!("tracker busy, '{}' cannot open a step", self.name),
            )
        })?;

        let input = match &self.input {
            Some(extract) => extract(&args),
            None => default_input(&args).map_err(TrackerError::from)?,
        };
        let request = CreateStepRequest::new(self.name.clone())
            .step_type(self.step_type.clone())
            .input(input);

        tracker
            .scoped_step(request, |step| async move {
                let result = (self.func)(args).await?;

                if let Some(extract) = &self.evaluations {
                    for evaluation in extract(&result) {
                        step.log_evaluation(
                            evaluation.entity_id,
                            evaluation.value,
                            evaluation.passed,
                            evaluation.reason,
                        )
                        .await?;
                    }
                }

                let output = match &self.output {
                    Some(extract) => extract(&result),
                    None => default_output(&result).map_err(TrackerError::from)?,
                };
                step.set_output(output);
                Ok::<_, E>(result)
            })
            .await
    }
}

/// Serialized arguments; a non-object is wrapped as `{"args": …}`.
fn default_input(args: &impl Serialize) -> serde_json::Result<Metadata> {
    Ok(match serde_json::to_value(args)? {
        Value::Object(map) => map,
        other => wrap("args", other),
    })
}

/// `{"result": …}`
fn default_output(result: &impl Serialize) -> serde_json::Result<Metadata> {
    Ok(wrap("result", serde_json::to_value(result)?))
}

fn wrap(key: &str, value: Value) -> Metadata {
    let mut map = Metadata::new();
    map.insert(key.to_string(), value);
    map
}

/// Last meaningful path segment of a function's type name.
fn function_name<F>() -> String {
    std::any::type_name::<F>()
        .rsplit("::")
        .find(|segment| !segment.starts_with('{'))
        .unwrap_or("anonymous")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xray_core::ExecutionStatus;
    use xray_store::MemoryStore;

    async fn fetch_candidates(category: String) -> Result<Vec<String>, TrackerError> {
        Ok(vec![format!("{category}-1"), format!("{category}-2")])
    }

    async fn shared_tracker() -> (Arc<MemoryStore>, SharedTracker<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut tracker = Tracker::new("traced", store.clone());
        tracker.start_execution(None).await.unwrap();
        (store, shared(tracker))
    }

    #[test]
    fn test_function_name() {
        fn name_of<F>(_: &F) -> String {
            function_name::<F>()
        }
        assert_eq!(name_of(&fetch_candidates), "fetch_candidates");
        assert_eq!(name_of(&|| ()), "test_function_name");
    }

    #[test]
    fn test_default_input_wraps_non_objects() {
        assert_eq!(default_input(&json!({"q": 1})).unwrap(), wrap("q", json!(1)));
        assert_eq!(default_input(&(1, "a")).unwrap(), wrap("args", json!([1, "a"])));
        assert_eq!(default_output(&json!({"q": 1})).unwrap(), wrap("result", json!({"q": 1})));
    }

    #[tokio::test]
    async fn test_default_input_and_output() {
        let (store, tracker) = shared_tracker().await;
        let traced = Traced::new(tracker.clone(), fetch_candidates).step_type("fetch");
        assert_eq!(traced.step_name(), "fetch_candidates");

        let result = traced.call("shoes".to_string()).await.unwrap();
        assert_eq!(result, vec!["shoes-1", "shoes-2"]);

        let tracker = tracker.lock().await;
        let execution = store
            .get_execution(tracker.execution_id().unwrap())
            .await
            .unwrap();
        let step = &execution.steps[0];
        assert_eq!(step.name, "fetch_candidates");
        assert_eq!(step.step_type, "fetch");
        assert_eq!(step.input.get("args"), Some(&json!("shoes")));
        assert_eq!(
            step.output.data_value("result"),
            Some(&json!(["shoes-1", "shoes-2"]))
        );
        assert!(step.is_ended());
    }

    #[tokio::test]
    async fn test_extractors() {
        let (store, tracker) = shared_tracker().await;
        let traced = Traced::new(tracker.clone(), |min: f64| async move {
            Ok::<_, TrackerError>(vec![("A", 4.5), ("B", 3.0)]
                .into_iter()
                .filter(|(_, rating)| *rating >= min)
                .map(|(id, _)| id.to_string())
                .collect::<Vec<_>>())
        })
        .name("filter_by_rating")
        .step_type("filter")
        .input_with(|min| json!({"min_rating": min}).as_object().cloned().unwrap_or_default())
        .output_with(|kept| json!({"passed": kept.len()}).as_object().cloned().unwrap_or_default())
        .evaluations_with(|kept| {
            kept.iter()
                .map(|id| CreateEvaluationRequest::new(id.clone(), json!(null), true, "kept"))
                .collect()
        });

        traced.call(4.0).await.unwrap();

        let tracker = tracker.lock().await;
        let execution = store
            .get_execution(tracker.execution_id().unwrap())
            .await
            .unwrap();
        let step = &execution.steps[0];
        assert_eq!(step.name, "filter_by_rating");
        assert_eq!(step.input.get("min_rating"), Some(&json!(4.0)));
        assert_eq!(step.output.passed, Some(1));
        assert_eq!(step.evaluations.len(), 1);
        assert_eq!(step.evaluations[0].entity_id, "A");
    }

    #[tokio::test]
    async fn test_failure_passes_through_and_closes_step() {
        let (store, tracker) = shared_tracker().await;
        let traced = Traced::new(tracker.clone(), |_: ()| async move {
            Err::<u32, _>(TrackerError::state("rank", "scoring model unavailable"))
        })
        .name("rank");

        let err = traced.call(()).await.unwrap_err();
        assert_eq!(err.to_string(), "rank: scoring model unavailable");

        let mut tracker = tracker.lock().await;
        let execution = store
            .get_execution(tracker.execution_id().unwrap())
            .await
            .unwrap();
        let step = &execution.steps[0];
        assert!(step.is_ended());
        assert!(step.output.data_value("error").is_some());
        assert!(tracker.current_step_id().is_none());
        tracker.end_execution(ExecutionStatus::Failed).await.unwrap();
    }

    #[tokio::test]
    async fn test_busy_tracker_is_rejected() {
        let (_store, tracker) = shared_tracker().await;
        let traced = Traced::new(tracker.clone(), |x: u32| async move { Ok::<_, TrackerError>(x) })
            .name("double");

        let _held = tracker.lock().await;
        let err = traced.call(2).await.unwrap_err();
        assert!(err.is_state());
        assert!(err.to_string().contains("tracker busy"));
    }
}
