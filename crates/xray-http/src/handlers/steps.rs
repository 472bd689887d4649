//! Step API Handlers

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Json,
};
use std::sync::Arc;
use xray_core::{CreateEvaluationRequest, Step, UpdateStepRequest};

use crate::error::ApiResult;
use crate::state::AppState;

/// GET /api/steps/:step_id
pub async fn get_step_handler(
    State(state): State<Arc<AppState>>,
    Path(step_id): Path<String>,
) -> ApiResult<Json<Step>> {
    Ok(Json(state.store.get_step(&step_id).await?))
}

/// PATCH /api/steps/:step_id - Set output and/or close the step
pub async fn update_step_handler(
    State(state): State<Arc<AppState>>,
    Path(step_id): Path<String>,
    payload: Result<Json<UpdateStepRequest>, JsonRejection>,
) -> ApiResult<Json<Step>> {
    let Json(update) = payload?;
    Ok(Json(state.store.update_step(&step_id, update).await?))
}

/// POST /api/steps/:step_id/evaluations - Append one evaluation
pub async fn add_evaluation_handler(
    State(state): State<Arc<AppState>>,
    Path(step_id): Path<String>,
    payload: Result<Json<CreateEvaluationRequest>, JsonRejection>,
) -> ApiResult<Json<Step>> {
    let Json(request) = payload?;
    let step = state.store.append_evaluation(&step_id, request).await?;
    state.metrics.evaluation_appended();
    Ok(Json(step))
}
