//! Route table for the record API

use axum::{
    http::Uri,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::handlers::{executions, health, metrics, steps};
use crate::metrics::track_errors;
use crate::state::AppState;

/// Build the full router: `/api/*` record routes, `/api/health` and `/metrics`.
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route(
            "/executions",
            post(executions::create_execution_handler).get(executions::list_executions_handler),
        )
        .route(
            "/executions/:execution_id",
            get(executions::get_execution_handler).patch(executions::update_execution_handler),
        )
        .route(
            "/executions/:execution_id/steps",
            post(executions::create_step_handler).get(executions::list_steps_handler),
        )
        .route(
            "/steps/:step_id",
            get(steps::get_step_handler).patch(steps::update_step_handler),
        )
        .route("/steps/:step_id/evaluations", post(steps::add_evaluation_handler))
        .route("/health", get(health::health_handler));

    info!("Mounting record API at /api");

    Router::new()
        .nest("/api", api)
        .route("/metrics", get(metrics::metrics_handler))
        .fallback(route_not_found)
        .layer(middleware::from_fn_with_state(state.clone(), track_errors))
        .with_state(state)
}

async fn route_not_found(uri: Uri) -> ApiError {
    ApiError::RouteNotFound(uri.path().to_string())
}
