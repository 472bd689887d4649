use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

use crate::state::AppState;

/// Prometheus metrics for the record API
#[derive(Clone)]
pub struct ApiMetrics {
    executions_created: IntCounter,

    /// Executions created and not yet ended
    running_executions: IntGauge,

    steps_created: IntCounter,

    evaluations_appended: IntCounter,

    /// 4xx/5xx responses, labelled by status code
    request_errors: IntCounterVec,

    registry: Registry,
}

impl ApiMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let executions_created = IntCounter::new(
            "xray_executions_created_total",
            "Total number of executions created",
        )?;
        registry.register(Box::new(executions_created.clone()))?;

        let running_executions = IntGauge::new(
            "xray_running_executions",
            "Number of executions that have not ended",
        )?;
        registry.register(Box::new(running_executions.clone()))?;

        let steps_created = IntCounter::new(
            "xray_steps_created_total",
            "Total number of steps opened",
        )?;
        registry.register(Box::new(steps_created.clone()))?;

        let evaluations_appended = IntCounter::new(
            "xray_evaluations_appended_total",
            "Total number of evaluations appended",
        )?;
        registry.register(Box::new(evaluations_appended.clone()))?;

        let request_errors = IntCounterVec::new(
            Opts::new(
                "xray_request_errors_total",
                "Total number of requests answered with an error status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(request_errors.clone()))?;

        Ok(Self {
            executions_created,
            running_executions,
            steps_created,
            evaluations_appended,
            request_errors,
            registry,
        })
    }

    pub fn execution_created(&self) {
        self.executions_created.inc();
        self.running_executions.inc();
    }

    pub fn execution_ended(&self) {
        self.running_executions.dec();
    }

    pub fn step_created(&self) {
        self.steps_created.inc();
    }

    pub fn evaluation_appended(&self) {
        self.evaluations_appended.inc();
    }

    pub fn request_failed(&self, status: u16) {
        let status = status.to_string();
        self.request_errors
            .with_label_values(&[status.as_str()])
            .inc();
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Count every error response.
pub async fn track_errors(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        state.metrics.request_failed(status.as_u16());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        let metrics = ApiMetrics::new().unwrap();
        metrics.execution_created();
        metrics.step_created();
        metrics.evaluation_appended();
        metrics.evaluation_appended();
        metrics.request_failed(404);

        let text = metrics.render().unwrap();
        assert!(text.contains("xray_executions_created_total 1"));
        assert!(text.contains("xray_running_executions 1"));
        assert!(text.contains("xray_evaluations_appended_total 2"));
        assert!(text.contains("xray_request_errors_total{status=\"404\"} 1"));

        metrics.execution_ended();
        assert!(metrics.render().unwrap().contains("xray_running_executions 0"));
    }
}
