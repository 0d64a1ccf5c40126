//! Remote server endpoints

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};

use crate::{
    models::ConnectivityResponse,
    utils::{AppError, AppResult},
    AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new().route("/{id}/check", post(check_connectivity))
}

/// Log in to the server and record its connectivity status
///
/// An unreachable server is a normal answer (`offline` plus the error),
/// not an HTTP failure.
async fn check_connectivity(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<ConnectivityResponse>> {
    let server = state
        .servers()
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Remote server {} not found", id)))?;

    let response = state.connectivity.check(&server).await?;
    Ok(Json(response))
}
