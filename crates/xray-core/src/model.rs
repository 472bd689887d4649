//! Stored records: Execution → Step → Evaluation
//!
//! These are the complete records a store hands back. Creation goes through
//! the request types in [`crate::request`], which carry no ids or timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Open key-value map used for execution metadata, step input and output data.
pub type Metadata = Map<String, Value>;

/// Step type used when a caller does not name one.
pub const DEFAULT_STEP_TYPE: &str = "default";

pub(crate) fn default_step_type() -> String {
    DEFAULT_STEP_TYPE.to_string()
}

pub(crate) fn default_rule_source() -> String {
    "config".to_string()
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Execution status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Execution is in flight; `ended_at` is unset
    Running,

    /// Execution finished normally
    Completed,

    /// Execution finished with a failure
    Failed,
}

impl ExecutionStatus {
    /// Completed and failed executions never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

/// One complete run of an instrumented pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub execution_id: String,

    pub name: String,

    pub status: ExecutionStatus,

    pub started_at: DateTime<Utc>,

    /// Set exactly once, together with a terminal status
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Step ids in creation order
    #[serde(default)]
    pub step_ids: Vec<String>,

    /// Nested steps; empty in list summaries unless steps were requested
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Execution {
    /// Create a running execution with a fresh id.
    pub fn new(name: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            execution_id: new_id(),
            name: name.into(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            metadata,
            step_ids: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.ended_at.is_some() || self.status.is_terminal()
    }

    /// Copy of this execution without nested steps.
    pub fn summary(&self) -> Self {
        Self {
            steps: Vec::new(),
            ..self.clone()
        }
    }
}

/// Documentary record of a criterion applied during a step.
///
/// The core never interprets `operator` or `value`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub rule_id: String,
    pub description: String,
    pub operator: String,
    pub value: Value,
    #[serde(default = "default_rule_source")]
    pub source: String,
}

impl Rule {
    pub fn new(
        rule_id: impl Into<String>,
        description: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            description: description.into(),
            operator: operator.into(),
            value: value.into(),
            source: default_rule_source(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// The verdict for one entity at one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub entity_id: String,
    pub value: Value,
    pub passed: bool,
    pub reason: String,
}

/// Output recorded when a step ends.
///
/// `passed`, `failed` and `selected_ids` are lifted out of the raw output map;
/// every other key stays in `data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepOutput {
    pub passed: Option<u64>,
    pub failed: Option<u64>,
    pub selected_ids: Option<Vec<String>>,
    pub data: Option<Metadata>,
}

impl StepOutput {
    /// Normalize a raw output map.
    ///
    /// A known key whose value has the wrong shape is kept in `data`
    /// untouched rather than dropped.
    pub fn from_map(mut map: Metadata) -> Self {
        let passed = take_if(&mut map, "passed", count);
        let failed = take_if(&mut map, "failed", count);
        let selected_ids = take_if(&mut map, "selected_ids", |v| {
            v.as_array()?
                .iter()
                .map(|id| id.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        });

        Self {
            passed,
            failed,
            selected_ids,
            data: if map.is_empty() { None } else { Some(map) },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.passed.is_none()
            && self.failed.is_none()
            && self.selected_ids.is_none()
            && self.data.as_ref().map_or(true, Map::is_empty)
    }

    /// Look up a key in `data`.
    pub fn data_value(&self, key: &str) -> Option<&Value> {
        self.data.as_ref()?.get(key)
    }
}

/// A count: a non-negative integer, or a float with no fractional part.
fn count(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f < u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}

fn take_if<T>(map: &mut Metadata, key: &str, extract: impl Fn(&Value) -> Option<T>) -> Option<T> {
    let extracted = map.get(key).and_then(|v| extract(v))?;
    map.remove(key);
    Some(extracted)
}

/// One decision point inside an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub step_id: String,

    /// Owning execution; never changes
    pub execution_id: String,

    pub name: String,

    #[serde(rename = "type", default = "default_step_type")]
    pub step_type: String,

    /// Captured at creation, immutable thereafter
    #[serde(default)]
    pub input: Metadata,

    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Append-only, insertion order
    #[serde(default)]
    pub evaluations: Vec<Evaluation>,

    #[serde(default)]
    pub output: StepOutput,

    pub started_at: DateTime<Utc>,

    pub ended_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Number of evaluations that passed.
    pub fn passed_count(&self) -> usize {
        self.evaluations.iter().filter(|e| e.passed).count()
    }

    /// Number of evaluations that failed.
    pub fn failed_count(&self) -> usize {
        self.evaluations.len() - self.passed_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        assert_eq!("completed".parse::<ExecutionStatus>().unwrap(), ExecutionStatus::Completed);
        assert_eq!(" FAILED ".parse::<ExecutionStatus>().unwrap(), ExecutionStatus::Failed);
        assert!("paused".parse::<ExecutionStatus>().is_err());
        assert_eq!(serde_json::to_value(ExecutionStatus::Running).unwrap(), json!("running"));
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_step_output_lifts_known_keys() {
        let output = StepOutput::from_map(as_map(json!({
            "passed": 1,
            "failed": 1,
            "selected_ids": ["a", "b"],
            "total_evaluated": 2
        })));

        assert_eq!(output.passed, Some(1));
        assert_eq!(output.failed, Some(1));
        assert_eq!(output.selected_ids, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(output.data_value("total_evaluated"), Some(&json!(2)));
    }

    #[test]
    fn test_step_output_lifts_whole_floats() {
        let output = StepOutput::from_map(as_map(json!({"passed": 1.0, "failed": 2.0})));
        assert_eq!(output.passed, Some(1));
        assert_eq!(output.failed, Some(2));
        assert!(output.data.is_none());

        let output = StepOutput::from_map(as_map(json!({"passed": 1.5, "failed": -1.0})));
        assert_eq!(output.passed, None);
        assert_eq!(output.failed, None);
        assert_eq!(output.data_value("passed"), Some(&json!(1.5)));
        assert_eq!(output.data_value("failed"), Some(&json!(-1.0)));
    }

    #[test]
    fn test_step_output_keeps_misshapen_keys_in_data() {
        let output = StepOutput::from_map(as_map(json!({
            "passed": "yes",
            "selected_ids": [1, 2],
            "error": "boom"
        })));

        assert_eq!(output.passed, None);
        assert_eq!(output.selected_ids, None);
        assert_eq!(output.data_value("passed"), Some(&json!("yes")));
        assert_eq!(output.data_value("selected_ids"), Some(&json!([1, 2])));
        assert_eq!(output.data_value("error"), Some(&json!("boom")));
    }

    #[test]
    fn test_empty_output() {
        assert!(StepOutput::from_map(Metadata::new()).is_empty());
        assert!(StepOutput::default().data.is_none());
    }

    #[test]
    fn test_step_deserializes_with_defaults() {
        let step: Step = serde_json::from_value(json!({
            "step_id": "s1",
            "execution_id": "e1",
            "name": "filter",
            "started_at": "2024-01-01T00:00:00Z",
            "ended_at": null
        }))
        .unwrap();

        assert_eq!(step.step_type, DEFAULT_STEP_TYPE);
        assert!(step.evaluations.is_empty());
        assert!(step.output.is_empty());
        assert!(!step.is_ended());
    }

    #[test]
    fn test_rule_source_defaults_to_config() {
        let rule: Rule = serde_json::from_value(json!({
            "rule_id": "min_rating",
            "description": "Rating must be at least 4.0",
            "operator": ">=",
            "value": 4.0
        }))
        .unwrap();
        assert_eq!(rule.source, "config");
        assert_eq!(Rule::new("r", "d", "==", 1).with_source("user").source, "user");
    }

    #[test]
    fn test_summary_drops_nested_steps() {
        let mut execution = Execution::new("e1", Metadata::new());
        execution.step_ids.push("s1".to_string());
        execution.steps.push(Step {
            step_id: "s1".to_string(),
            execution_id: execution.execution_id.clone(),
            name: "filter".to_string(),
            step_type: "filter".to_string(),
            input: Metadata::new(),
            rules: Vec::new(),
            evaluations: Vec::new(),
            output: StepOutput::default(),
            started_at: Utc::now(),
            ended_at: None,
        });

        let summary = execution.summary();
        assert!(summary.steps.is_empty());
        assert_eq!(summary.step_ids, vec!["s1".to_string()]);
    }
}
