//! xray-tracker: record decision trails from application code
//!
//! ```text
//! application
//!     ├── Tracker            start/end execution, start/end step, evaluations
//!     ├── scoped_step        step closed on success, error or panic
//!     ├── Traced             async function call recorded as one step
//!     ├── StepRunner         steps driven by a JSON/YAML pipeline config
//!     └── helpers            filter / rank / transform / select steps
//!             │
//!             ▼
//!     RecordStore: MemoryStore (in process) or HttpStore (xray API)
//! ```

pub mod config;
pub mod error;
pub mod helpers;
pub mod http_store;
pub mod runner;
pub mod scope;
pub mod traced;
pub mod tracker;

pub use config::TrackerConfig;
pub use error::{Result, TrackerError};
pub use helpers::{
    filter_step, filter_step_with, rank_step, rank_step_with, select_step, select_step_with,
    transform_step, transform_step_with, Entity,
};
pub use http_store::HttpStore;
pub use runner::{
    PipelineConfig, PipelineFailure, PipelineReport, RunnerError, StepConfig, StepHandler,
    StepRunner, EVALUATIONS_KEY,
};
pub use scope::StepHandle;
pub use traced::{shared, SharedTracker, Traced};
pub use tracker::Tracker;
