//! `RecordStore` over the HTTP/JSON API
//!
//! Every remote failure is normalized into a `StoreError`: a 404 whose error
//! body names the addressed record maps back to `NotFound`, 400 to `InvalidArgument`,
//! 409 to `InvalidState`, and anything else (connection errors, timeouts,
//! unexpected statuses, undecodable bodies) to `Transport` with the
//! operation name attached.

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use xray_core::{
    CreateEvaluationRequest, CreateExecutionRequest, CreateStepRequest, Execution,
    ListExecutionsQuery, Step, UpdateExecutionRequest, UpdateStepRequest, Validate,
    ValidationError,
};
use xray_store::{RecordKind, RecordStore, Result, StoreError};

use crate::config::TrackerConfig;

/// Shape of the service's error bodies
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Record addressed by a call, used to rebuild typed errors
type Target<'a> = Option<(RecordKind, &'a str)>;

pub struct HttpStore {
    client: reqwest::Client,
    base_url: Url,
    validate_requests: bool,
}

impl HttpStore {
    pub fn new(config: &TrackerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::transport("build_client", e))?;

        let base_url = Url::parse(config.api_url.trim_end_matches('/'))
            .map_err(|e| ValidationError::new("api_url", e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ValidationError::new("api_url", "must be an http(s) base URL").into());
        }

        Ok(Self {
            client,
            base_url,
            validate_requests: config.validate_requests,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// `{base}/api/{segments...}`, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                StoreError::transport("build_url", format!("{} cannot be a base URL", self.base_url))
            })?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    fn check(&self, request: &impl Validate) -> Result<()> {
        if self.validate_requests {
            request.validate()?;
        }
        Ok(())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
        target: Target<'_>,
    ) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::transport(operation, e))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| StoreError::transport(operation, e));
        }

        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ErrorBody>(&body).ok();
        let from_api = parsed.is_some();
        let message = parsed.map(|b| b.error).unwrap_or(body);
        debug!(operation, status = status.as_u16(), %message, "Record API returned an error");

        Err(match (status, target) {
            // A 404 for a missing record names it; anything else is a wrong URL or route
            (StatusCode::NOT_FOUND, Some((kind, id)))
                if from_api && message.starts_with(&format!("{} not found", kind)) =>
            {
                StoreError::NotFound {
                    kind,
                    id: id.to_string(),
                }
            }
            (StatusCode::BAD_REQUEST, _) => StoreError::InvalidArgument(ValidationError::new(
                "request",
                message.trim_start_matches("invalid argument: "),
            )),
            (StatusCode::CONFLICT, Some((kind, id))) => {
                StoreError::invalid_state(kind, id, message)
            }
            _ => StoreError::transport(operation, format!("HTTP {}: {}", status, message)),
        })
    }
}

#[async_trait]
impl RecordStore for HttpStore {
    async fn create_execution(&self, request: CreateExecutionRequest) -> Result<Execution> {
        self.check(&request)?;
        let builder = self.client.post(self.url(&["executions"])?).json(&request);
        self.send("create_execution", builder, None).await
    }

    async fn list_executions(&self, query: ListExecutionsQuery) -> Result<Vec<Execution>> {
        let builder = self.client.get(self.url(&["executions"])?).query(&query);
        self.send("list_executions", builder, None).await
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Execution> {
        let builder = self
            .client
            .get(self.url(&["executions", execution_id])?);
        self.send(
            "get_execution",
            builder,
            Some((RecordKind::Execution, execution_id)),
        )
        .await
    }

    async fn update_execution(
        &self,
        execution_id: &str,
        update: UpdateExecutionRequest,
    ) -> Result<Execution> {
        self.check(&update)?;
        let builder = self
            .client
            .patch(self.url(&["executions", execution_id])?)
            .query(&update);
        self.send(
            "update_execution",
            builder,
            Some((RecordKind::Execution, execution_id)),
        )
        .await
    }

    async fn create_step(&self, execution_id: &str, request: CreateStepRequest) -> Result<Step> {
        self.check(&request)?;
        let builder = self
            .client
            .post(self.url(&["executions", execution_id, "steps"])?)
            .json(&request);
        self.send(
            "create_step",
            builder,
            Some((RecordKind::Execution, execution_id)),
        )
        .await
    }

    async fn get_step(&self, step_id: &str) -> Result<Step> {
        let builder = self.client.get(self.url(&["steps", step_id])?);
        self.send("get_step", builder, Some((RecordKind::Step, step_id)))
            .await
    }

    async fn list_steps(&self, execution_id: &str) -> Result<Vec<Step>> {
        let builder = self
            .client
            .get(self.url(&["executions", execution_id, "steps"])?);
        self.send(
            "list_steps",
            builder,
            Some((RecordKind::Execution, execution_id)),
        )
        .await
    }

    async fn update_step(&self, step_id: &str, update: UpdateStepRequest) -> Result<Step> {
        self.check(&update)?;
        let builder = self
            .client
            .patch(self.url(&["steps", step_id])?)
            .json(&update);
        self.send("update_step", builder, Some((RecordKind::Step, step_id)))
            .await
    }

    async fn append_evaluation(
        &self,
        step_id: &str,
        request: CreateEvaluationRequest,
    ) -> Result<Step> {
        self.check(&request)?;
        let builder = self
            .client
            .post(self.url(&["steps", step_id, "evaluations"])?)
            .json(&request);
        self.send(
            "append_evaluation",
            builder,
            Some((RecordKind::Step, step_id)),
        )
        .await
    }
}
