//! Execution API Handlers

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    response::Json,
};
use std::sync::Arc;
use tracing::debug;
use xray_core::{
    CreateExecutionRequest, CreateStepRequest, Execution, ListExecutionsQuery, Step,
    UpdateExecutionRequest,
};

use crate::error::ApiResult;
use crate::state::AppState;

/// POST /api/executions - Start a new execution
pub async fn create_execution_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateExecutionRequest>, JsonRejection>,
) -> ApiResult<Json<Execution>> {
    let Json(request) = payload?;
    let execution = state.store.create_execution(request).await?;
    state.metrics.execution_created();
    Ok(Json(execution))
}

/// GET /api/executions?limit=N&include_steps=bool - Most recent executions first
pub async fn list_executions_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListExecutionsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Execution>>> {
    let Query(query) = query?;
    debug!(limit = query.limit, include_steps = query.include_steps, "Listing executions");
    Ok(Json(state.store.list_executions(query).await?))
}

/// GET /api/executions/:execution_id - Execution with nested steps and evaluations
pub async fn get_execution_handler(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<String>,
) -> ApiResult<Json<Execution>> {
    Ok(Json(state.store.get_execution(&execution_id).await?))
}

/// PATCH /api/executions/:execution_id?status=&ended_at= - End an execution
pub async fn update_execution_handler(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<String>,
    update: Result<Query<UpdateExecutionRequest>, QueryRejection>,
) -> ApiResult<Json<Execution>> {
    let Query(update) = update?;
    let execution = state.store.update_execution(&execution_id, update).await?;
    // The store rejects updates to ended executions, so this fires once.
    if execution.is_terminal() {
        state.metrics.execution_ended();
    }
    Ok(Json(execution))
}

/// POST /api/executions/:execution_id/steps - Open a step
pub async fn create_step_handler(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<String>,
    payload: Result<Json<CreateStepRequest>, JsonRejection>,
) -> ApiResult<Json<Step>> {
    let Json(request) = payload?;
    let step = state.store.create_step(&execution_id, request).await?;
    state.metrics.step_created();
    Ok(Json(step))
}

/// GET /api/executions/:execution_id/steps - Steps in creation order
pub async fn list_steps_handler(
    State(state): State<Arc<AppState>>,
    Path(execution_id): Path<String>,
) -> ApiResult<Json<Vec<Step>>> {
    Ok(Json(state.store.list_steps(&execution_id).await?))
}
