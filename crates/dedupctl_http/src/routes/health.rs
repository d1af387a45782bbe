//! Liveness/readiness route (spec §6, §13).

use axum::extract::State;
use axum::Json;
use chrono::Utc;

use crate::dto::HealthResponse;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "dedupctl".to_string(),
        environment: state.settings.environment.clone(),
        dry_run: state.settings.dry_run,
        timestamp: Utc::now(),
    })
}
