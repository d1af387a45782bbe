//! Duplicate-group query routes (spec §6, C7/C8).

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;

use crate::dto::PageQuery;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list_groups(State(state): State<AppState>, Query(query): Query<PageQuery>) -> ApiResult<impl IntoResponse> {
    let result = state.duplicates.list_groups(query.limit, query.cursor.as_deref()).await?;
    Ok(Json(result))
}

pub async fn list_group_files(
    State(state): State<AppState>,
    Path(group_key): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let result = state
        .duplicates
        .list_group_files(&group_key, query.limit, query.cursor.as_deref())
        .await?;
    Ok(Json(result))
}
