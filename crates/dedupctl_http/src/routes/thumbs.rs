//! Thumbnail queue routes (spec §6, C5).

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use crate::dto::{ThumbnailCleanupRequest, ThumbnailRequest};
use crate::error::ApiResult;
use crate::state::AppState;
use dedupctl_core::thumbs::ThumbnailStatus;
use dedupctl_core::CoreError;

pub async fn request_thumbnail(State(state): State<AppState>, Json(req): Json<ThumbnailRequest>) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .thumbs
        .request_thumbnail(req.file_id, req.max_dimension, req.format.as_deref())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

pub async fn get_thumbnail(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult<impl IntoResponse> {
    let snapshot = state.thumbs.get_thumbnail(&key).await?;
    Ok(Json(snapshot))
}

pub async fn get_thumbnail_content(State(state): State<AppState>, Path(key): Path<String>) -> ApiResult<impl IntoResponse> {
    let snapshot = state.thumbs.get_thumbnail(&key).await?;
    if snapshot.status != ThumbnailStatus::Ready {
        return Err(CoreError::conflict(format!(
            "thumbnail {key} is not ready (status: {})",
            snapshot.status
        ))
        .into());
    }
    let path = state.thumbs.resolve_thumbnail_output_path(&snapshot)?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| CoreError::conflict(format!("thumbnail output could not be resolved: {e}")))?;
    let content_type = match snapshot.format.extension() {
        "webp" => "image/webp",
        "png" => "image/png",
        _ => "image/jpeg",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

pub async fn cleanup_group(State(state): State<AppState>, Json(req): Json<ThumbnailCleanupRequest>) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .thumbs
        .schedule_group_cleanup(&req.group_key, req.delay_seconds)
        .await?;
    Ok(Json(snapshot))
}

pub async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let metrics = state.thumbs.get_metrics().await?;
    Ok(Json(metrics))
}
