//! Job coordinator routes (spec §6, C4).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::dto::{CancelRequest, ClaimRequest, CreateJobRequest, FinishRequest, HeartbeatRequest, JobListQuery, RecoverStaleResponse};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use dedupctl_core::jobs::JobKind;
use dedupctl_core::CoreError;

const DEFAULT_LIST_LIMIT: i64 = 50;

pub async fn create_job(State(state): State<AppState>, Json(req): Json<CreateJobRequest>) -> ApiResult<impl IntoResponse> {
    let kind: JobKind = req
        .kind
        .parse()
        .map_err(|e: String| ApiError(CoreError::validation(e)))?;
    let job = state.jobs.create_job(kind, req.payload, req.dry_run).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn list_jobs(State(state): State<AppState>, Query(query): Query<JobListQuery>) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let result = state.jobs.list_jobs(limit, query.cursor.as_deref()).await?;
    Ok(Json(result))
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let job = state.jobs.get_job(&id).await?;
    Ok(Json(job))
}

pub async fn claim_job(State(state): State<AppState>, Json(req): Json<ClaimRequest>) -> ApiResult<axum::response::Response> {
    match state.jobs.claim_pending_scan_hash_job(&req.worker_id).await? {
        Some(job) => Ok(Json(job).into_response()),
        None => Ok((StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "no pending scan/hash job available"}))).into_response()),
    }
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = state
        .jobs
        .heartbeat(&id, &req.worker_id, req.progress, req.processed_items)
        .await?;
    Ok(Json(job))
}

pub async fn finish_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FinishRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = state
        .jobs
        .finish_job(&id, &req.worker_id, req.success, req.error_message.as_deref())
        .await?;
    Ok(Json(job))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = state.jobs.cancel_job(&id, req.error_message.as_deref()).await?;
    Ok(Json(job))
}

pub async fn reset_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let job = state.jobs.reset_retryable_job(&id).await?;
    Ok(Json(job))
}

pub async fn recover_stale(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let recovered = state.jobs.recover_stale_jobs().await?;
    Ok(Json(RecoverStaleResponse { recovered }))
}
