//! Request/response bodies for the HTTP adapter (spec §6).
//!
//! Snapshot and list-result types are re-exported from `dedupctl_core` and
//! serialized directly; this module only holds the shapes that don't exist
//! as core domain types (request bodies, list-query params).

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub kind: String,
    #[serde(default = "default_payload")]
    pub payload: serde_json::Value,
    pub dry_run: Option<bool>,
}

fn default_payload() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub worker_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub progress: Option<f64>,
    pub processed_items: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FinishRequest {
    pub worker_id: String,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecoverStaleResponse {
    pub recovered: u64,
}

#[derive(Debug, Deserialize)]
pub struct ThumbnailRequest {
    pub file_id: i64,
    pub max_dimension: Option<i64>,
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ThumbnailCleanupRequest {
    pub group_key: String,
    pub delay_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CheckpointRequest {
    pub mode: Option<String>,
    pub reason: Option<String>,
    pub requested_by: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub environment: String,
    pub dry_run: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
