//! WAL maintenance routes (spec §6, C6).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::dto::CheckpointRequest;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn request_checkpoint(State(state): State<AppState>, Json(req): Json<CheckpointRequest>) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .maintenance
        .request_checkpoint(
            req.mode.as_deref(),
            req.reason.as_deref(),
            req.requested_by.as_deref(),
            req.force,
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

pub async fn latest_checkpoint(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let snapshot = state.maintenance.get_latest().await?;
    Ok(Json(snapshot))
}

pub async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let metrics = state.maintenance.get_metrics().await?;
    Ok(Json(metrics))
}
