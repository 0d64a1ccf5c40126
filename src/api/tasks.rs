//! Backup task endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::{
    models::{TaskLogResponse, TaskStatusResponse},
    utils::{AppError, AppResult},
    AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{id}/run", post(run_task))
        .route("/{id}/status", get(get_task_status))
        .route("/{id}/logs/latest", get(get_latest_log))
}

/// Start a backup run
///
/// Returns 202 once the task is claimed; the run continues in the
/// background. Paused, running or server-busy tasks get 409.
async fn run_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<(StatusCode, Json<TaskStatusResponse>)> {
    let response = state.orchestrator.trigger(id).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn get_task_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<TaskStatusResponse>> {
    let task = state
        .tasks()
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Backup task {} not found", id)))?;

    Ok(Json(TaskStatusResponse::from(&task)))
}

/// Log of the most recent run
async fn get_latest_log(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<TaskLogResponse>> {
    state
        .tasks()
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Backup task {} not found", id)))?;

    let log = state
        .task_logs()
        .latest_for_task(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Backup task {} has not run yet", id)))?;

    Ok(Json(TaskLogResponse::from(log)))
}
