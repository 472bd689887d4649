//! Configuration-driven steps
//!
//! A `StepRunner` maps step types to handlers and executes steps described
//! by `StepConfig` entries, individually or as a pipeline loaded from JSON
//! or YAML.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use xray_core::{CreateEvaluationRequest, CreateStepRequest, Metadata, Rule};
use xray_store::RecordStore;

use crate::error::TrackerError;
use crate::tracker::Tracker;

/// Key under which a handler may return evaluations to record
pub const EVALUATIONS_KEY: &str = "evaluations";

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("config error: {0}")]
    Config(String),

    #[error("step '{step}' failed: {source}")]
    Handler {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Handler for one step type: `(input, rules) -> output`.
///
/// An object output is recorded as the step output; any other value is
/// wrapped as `{"result": value}`. An `evaluations` array in an object
/// output is recorded as evaluations and removed from the output.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(&self, input: Metadata, rules: Vec<Rule>) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> StepHandler for F
where
    F: Fn(Metadata, Vec<Rule>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn handle(&self, input: Metadata, rules: Vec<Rule>) -> anyhow::Result<Value> {
        self(input, rules).await
    }
}

/// One step of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepConfig {
    pub name: String,

    #[serde(rename = "type", default = "default_type")]
    pub step_type: String,

    #[serde(default)]
    pub input: Metadata,

    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Merge the previous step's output into this step's input.
    /// Keys already present in `input` win.
    #[serde(default)]
    pub inherit_output: bool,
}

fn default_type() -> String {
    xray_core::DEFAULT_STEP_TYPE.to_string()
}

impl StepConfig {
    pub fn new(name: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step_type: step_type.into(),
            input: Metadata::new(),
            rules: Vec::new(),
            inherit_output: false,
        }
    }

    pub fn input(mut self, input: Metadata) -> Self {
        self.input = input;
        self
    }

    pub fn rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn inherit_output(mut self, inherit: bool) -> Self {
        self.inherit_output = inherit;
        self
    }
}

/// A named list of steps, as stored in a pipeline file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<StepConfig>,
}

impl PipelineConfig {
    pub fn from_json(content: &str) -> Result<Self, RunnerError> {
        serde_json::from_str(content)
            .map_err(|e| RunnerError::Config(format!("invalid pipeline JSON: {}", e)))
    }

    pub fn from_yaml(content: &str) -> Result<Self, RunnerError> {
        serde_yaml::from_str(content)
            .map_err(|e| RunnerError::Config(format!("invalid pipeline YAML: {}", e)))
    }

    /// Load by extension: `.json`, or `.yaml` / `.yml`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RunnerError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RunnerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            other => Err(RunnerError::Config(format!(
                "unsupported pipeline file extension {:?} for {}",
                other,
                path.display()
            ))),
        }
    }
}

/// Where a pipeline stopped
#[derive(Debug)]
pub struct PipelineFailure {
    pub index: usize,
    pub step: String,
    pub error: RunnerError,
}

/// Outputs of the steps that completed, plus the failure that stopped the run
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub outputs: Vec<Metadata>,
    pub failure: Option<PipelineFailure>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Registry of step handlers keyed by step type
#[derive(Default)]
pub struct StepRunner {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl StepRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `step_type`, replacing any previous one.
    pub fn register(&mut self, step_type: impl Into<String>, handler: impl StepHandler + 'static) {
        let step_type = step_type.into();
        if self
            .handlers
            .insert(step_type.clone(), Arc::new(handler))
            .is_some()
        {
            warn!(%step_type, "Replaced step handler");
        }
    }

    pub fn has_handler(&self, step_type: &str) -> bool {
        self.handlers.contains_key(step_type)
    }

    /// Run one configured step; returns the recorded output.
    pub async fn execute_step<S: RecordStore + ?Sized>(
        &self,
        tracker: &mut Tracker<S>,
        config: &StepConfig,
    ) -> Result<Metadata, RunnerError> {
        let handler = self.handlers.get(&config.step_type).cloned().ok_or_else(|| {
            RunnerError::Config(format!(
                "no handler registered for step type '{}' (step '{}')",
                config.step_type, config.name
            ))
        })?;

        let request = CreateStepRequest::new(config.name.clone())
            .step_type(config.step_type.clone())
            .input(config.input.clone())
            .rules(config.rules.clone());
        let input = config.input.clone();
        let rules = config.rules.clone();
        let name = config.name.clone();

        tracker
            .scoped_step(request, |step| async move {
                let result = handler
                    .handle(input, rules)
                    .await
                    .map_err(|source| RunnerError::Handler { step: name, source })?;

                let mut output = match result {
                    Value::Object(map) => map,
                    other => {
                        let mut map = Metadata::new();
                        map.insert("result".to_string(), other);
                        map
                    }
                };

                if matches!(output.get(EVALUATIONS_KEY), Some(Value::Array(_))) {
                    if let Some(evaluations) = output.remove(EVALUATIONS_KEY) {
                        let evaluations: Vec<CreateEvaluationRequest> =
                            serde_json::from_value(evaluations).map_err(TrackerError::from)?;
                        for evaluation in evaluations {
                            step.log_evaluation(
                                evaluation.entity_id,
                                evaluation.value,
                                evaluation.passed,
                                evaluation.reason,
                            )
                            .await?;
                        }
                    }
                }

                step.set_output(output.clone());
                Ok::<_, RunnerError>(output)
            })
            .await
    }

    /// Run `steps` in order, stopping at the first failure.
    pub async fn execute_pipeline<S: RecordStore + ?Sized>(
        &self,
        tracker: &mut Tracker<S>,
        steps: &[StepConfig],
    ) -> PipelineReport {
        let mut report = PipelineReport::default();

        for (index, config) in steps.iter().enumerate() {
            let inherited;
            let config = match report.outputs.last() {
                Some(previous) if config.inherit_output => {
                    inherited = with_inherited_input(config, previous);
                    &inherited
                }
                _ => config,
            };

            match self.execute_step(tracker, config).await {
                Ok(output) => report.outputs.push(output),
                Err(error) => {
                    warn!(index, step = %config.name, %error, "Pipeline aborted");
                    report.failure = Some(PipelineFailure {
                        index,
                        step: config.name.clone(),
                        error,
                    });
                    return report;
                }
            }
        }

        info!(steps = report.outputs.len(), "Pipeline completed");
        report
    }
}

fn with_inherited_input(config: &StepConfig, previous: &Metadata) -> StepConfig {
    let mut config = config.clone();
    for (key, value) in previous {
        config
            .input
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xray_core::ExecutionStatus;
    use xray_store::MemoryStore;

    fn map(value: Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    async fn open_tracker() -> (Arc<MemoryStore>, Tracker<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut tracker = Tracker::new("pipeline", store.clone());
        tracker.start_execution(None).await.unwrap();
        (store, tracker)
    }

    fn runner() -> StepRunner {
        let mut runner = StepRunner::new();
        runner.register("filter", |input: Metadata, _rules: Vec<Rule>| async move {
            let min = input.get("min_rating").and_then(Value::as_f64).unwrap_or(0.0);
            let candidates = input
                .get("candidates")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            let mut passed = Vec::new();
            let mut evaluations = Vec::new();
            for candidate in &candidates {
                let rating = candidate["rating"].as_f64().unwrap_or(0.0);
                let ok = rating >= min;
                evaluations.push(json!({
                    "entity_id": candidate["id"],
                    "value": candidate,
                    "passed": ok,
                    "reason": format!("rating {} vs {}", rating, min)
                }));
                if ok {
                    passed.push(candidate.clone());
                }
            }

            Ok::<_, anyhow::Error>(json!({
                "passed": passed.len(),
                "failed": candidates.len() - passed.len(),
                "candidates": passed,
                "evaluations": evaluations
            }))
        });
        runner.register("count", |input: Metadata, _rules: Vec<Rule>| async move {
            let count = input
                .get("candidates")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            Ok::<_, anyhow::Error>(json!(count))
        });
        runner.register("fail", |_input: Metadata, _rules: Vec<Rule>| async move {
            Err::<Value, _>(anyhow::anyhow!("handler exploded"))
        });
        runner
    }

    #[tokio::test]
    async fn test_execute_step_replays_evaluations() {
        let (store, mut tracker) = open_tracker().await;
        let config = StepConfig::new("filter by rating", "filter").input(map(json!({
            "min_rating": 4.0,
            "candidates": [{"id": "A", "rating": 4.5}, {"id": "B", "rating": 3.0}]
        })));

        let output = runner().execute_step(&mut tracker, &config).await.unwrap();
        assert!(!output.contains_key(EVALUATIONS_KEY));
        assert_eq!(output["passed"], json!(1));

        let execution = store
            .get_execution(tracker.execution_id().unwrap())
            .await
            .unwrap();
        let step = &execution.steps[0];
        assert_eq!(step.step_type, "filter");
        assert_eq!(step.evaluations.len(), 2);
        assert!(step.evaluations[0].passed);
        assert!(!step.evaluations[1].passed);
        assert_eq!(step.output.passed, Some(1));
        assert!(step.output.data_value(EVALUATIONS_KEY).is_none());
    }

    #[tokio::test]
    async fn test_missing_handler_opens_no_step() {
        let (store, mut tracker) = open_tracker().await;
        let err = runner()
            .execute_step(&mut tracker, &StepConfig::new("mystery", "unknown"))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Config(_)));

        let execution = store
            .get_execution(tracker.execution_id().unwrap())
            .await
            .unwrap();
        assert!(execution.steps.is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_inherits_output() {
        let (_store, mut tracker) = open_tracker().await;
        let steps = vec![
            StepConfig::new("filter", "filter").input(map(json!({
                "min_rating": 4.0,
                "candidates": [{"id": "A", "rating": 4.5}, {"id": "B", "rating": 3.0}]
            }))),
            StepConfig::new("count", "count").inherit_output(true),
        ];

        let report = runner().execute_pipeline(&mut tracker, &steps).await;
        assert!(report.is_success());
        assert_eq!(report.outputs.len(), 2);
        assert_eq!(report.outputs[1]["result"], json!(1));

        tracker.end_execution(ExecutionStatus::Completed).await.unwrap();
    }

    #[tokio::test]
    async fn test_pipeline_aborts_on_first_failure() {
        let (store, mut tracker) = open_tracker().await;
        let steps = vec![
            StepConfig::new("explode", "fail"),
            StepConfig::new("never", "count"),
        ];

        let report = runner().execute_pipeline(&mut tracker, &steps).await;
        assert!(report.outputs.is_empty());
        let failure = report.failure.unwrap();
        assert_eq!(failure.index, 0);
        assert_eq!(failure.step, "explode");
        assert!(matches!(failure.error, RunnerError::Handler { .. }));

        let execution = store
            .get_execution(tracker.execution_id().unwrap())
            .await
            .unwrap();
        assert_eq!(execution.steps.len(), 1);
        let step = &execution.steps[0];
        assert!(step.is_ended());
        assert!(step
            .output
            .data_value("error")
            .and_then(Value::as_str)
            .unwrap()
            .contains("handler exploded"));
    }

    #[test]
    fn test_pipeline_config_formats() {
        let yaml = r#"
name: hiring
steps:
  - name: Filter Candidates
    type: filter
    input:
      min_rating: 4.0
    rules:
      - rule_id: min_rating
        description: Rating must be at least 4.0
        operator: ">="
        value: 4.0
  - name: Count
    type: count
    inherit_output: true
"#;
        let pipeline = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(pipeline.name.as_deref(), Some("hiring"));
        assert_eq!(pipeline.steps.len(), 2);
        assert_eq!(pipeline.steps[0].rules[0].source, "config");
        assert!(pipeline.steps[1].inherit_output);

        let json = serde_json::to_string(&pipeline).unwrap();
        assert_eq!(PipelineConfig::from_json(&json).unwrap(), pipeline);

        assert!(matches!(
            PipelineConfig::from_json("{\"steps\": 3}"),
            Err(RunnerError::Config(_))
        ));
    }

    #[test]
    fn test_pipeline_from_file() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"steps": [{{"name": "only", "type": "count"}}]}}"#).unwrap();
        let pipeline = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(pipeline.steps[0].name, "only");

        let other = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(PipelineConfig::from_file(other.path()).is_err());
    }
}
