//! Handlers for `/api/v1/tasks`, `/api/v1/queue` and `/health`.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::auth::Caller;
use super::error::ApiResult;
use crate::model::{CancelMode, TaskId};
use crate::wire::{
    ClaimRequest, EnqueueRequest, FinalizeRequest, ListParams, PatchLogRequest, TaskDetailed,
    TaskSummary,
};

/// POST /api/v1/tasks
///
/// 201 with the new task, 409 with `existing_task_id` on a duplicate.
pub async fn enqueue(
    caller: Caller,
    State(state): State<AppState>,
    Json(input): Json<EnqueueRequest>,
) -> ApiResult<impl IntoResponse> {
    caller.require_write()?;
    let task = state.engine.enqueue(input.into()).await?;
    Ok((StatusCode::CREATED, Json(TaskDetailed::from(&task))))
}

/// GET /api/v1/tasks
pub async fn list(
    _caller: Caller,
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<TaskSummary>>> {
    let query = params.into_query()?;
    let tasks = state.engine.list(&query).await?;
    Ok(Json(tasks.iter().map(TaskSummary::from).collect()))
}

/// GET /api/v1/tasks/{id}
pub async fn get_task(
    _caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskDetailed>> {
    let id: TaskId = id.parse()?;
    let task = state.engine.get(id).await?;
    Ok(Json(TaskDetailed::from(&task)))
}

/// PATCH /api/v1/tasks/{id}
///
/// Appends `log_append` to the task log.
pub async fn patch_log(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<PatchLogRequest>,
) -> ApiResult<Json<TaskDetailed>> {
    caller.require_write()?;
    let id: TaskId = id.parse()?;
    let task = state.engine.patch_log(id, &input.log_append).await?;
    Ok(Json(TaskDetailed::from(&task)))
}

/// PUT /api/v1/tasks/{id}/finalize
pub async fn finalize(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<FinalizeRequest>,
) -> ApiResult<Json<TaskDetailed>> {
    caller.require_write()?;
    let id: TaskId = id.parse()?;
    let task = state.engine.finalize(id, input.into()).await?;
    Ok(Json(TaskDetailed::from(&task)))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelParams {
    #[serde(default)]
    pub mode: CancelMode,
}

/// POST /api/v1/tasks/{id}/cancel?mode=queued|running
pub async fn cancel(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<CancelParams>,
) -> ApiResult<Json<TaskDetailed>> {
    caller.require_write()?;
    let id: TaskId = id.parse()?;
    let task = state.engine.cancel(id, params.mode).await?;
    tracing::info!(%id, state = %task.state, mode = ?params.mode, "cancel requested");
    Ok(Json(TaskDetailed::from(&task)))
}

/// POST /api/v1/tasks/{id}/priority-boost
pub async fn priority_boost(
    caller: Caller,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskDetailed>> {
    caller.require_write()?;
    let id: TaskId = id.parse()?;
    let task = state.engine.priority_boost(id).await?;
    Ok(Json(TaskDetailed::from(&task)))
}

/// POST /api/v1/queue/claim
///
/// 200 with the claimed (or reattached) task, 204 when nothing is claimable.
pub async fn claim(
    caller: Caller,
    State(state): State<AppState>,
    Json(input): Json<ClaimRequest>,
) -> ApiResult<Response> {
    caller.require_write()?;
    let claimed = state
        .engine
        .claim(&input.worker_name, &input.filter())
        .await?;
    Ok(match claimed {
        Some(task) => Json(TaskDetailed::from(&task)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store_healthy: bool,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store_healthy = state.engine.health_check().await.is_ok();
    let (status, label) = if store_healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store_healthy,
        }),
    )
}
