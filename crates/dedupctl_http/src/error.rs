//! `CoreError` → HTTP status mapping (spec §7, §13).
//!
//! One `IntoResponse` impl, so no handler picks a status code by hand.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dedupctl_core::CoreError;
use serde::Serialize;

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    wait_seconds: Option<i64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, wait_seconds) = match &self.0 {
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            CoreError::InvalidState(_) => (StatusCode::CONFLICT, None),
            CoreError::Conflict(_) => (StatusCode::CONFLICT, None),
            CoreError::RateLimited { wait_seconds, .. } => (StatusCode::TOO_MANY_REQUESTS, Some(*wait_seconds)),
            CoreError::QueueFull(_) => (StatusCode::TOO_MANY_REQUESTS, None),
            CoreError::Policy(_) => (StatusCode::CONFLICT, None),
            CoreError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, None),
            CoreError::QueryError(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
            CoreError::Store(err) => {
                tracing::error!(error = %err, "unexpected store error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = ErrorBody {
            error: self.0.to_string(),
            wait_seconds,
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
