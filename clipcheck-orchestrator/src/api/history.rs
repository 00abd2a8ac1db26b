//! History API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
};
use clipcheck_core::domain::job::HistoryItem;
use clipcheck_core::dto::job::DeleteResponse;
use serde::Deserialize;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::store::DEFAULT_HISTORY_LIMIT;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAllQuery {
    #[serde(default)]
    pub all: bool,
}

/// GET /api/history
/// Most recently updated jobs first
pub async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<HistoryItem>>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    tracing::debug!("Listing history (limit: {})", limit);

    Ok(Json(state.store.list_history(limit).await))
}

/// DELETE /api/history/{id}
pub async fn delete_history_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    tracing::info!("Deleting job: {}", id);

    if !state.store.delete_job(&id).await {
        return Err(ApiError::NotFound("Job not found".to_string()));
    }

    Ok(Json(DeleteResponse {
        ok: true,
        deleted: None,
    }))
}

/// DELETE /api/history?all=true
pub async fn delete_all_history(
    State(state): State<AppState>,
    Query(query): Query<DeleteAllQuery>,
) -> ApiResult<Json<DeleteResponse>> {
    if !query.all {
        return Err(ApiError::BadRequest(
            "Set all=true to delete all history.".to_string(),
        ));
    }

    let deleted = state.store.delete_all_history().await;
    tracing::info!("Deleted all history ({} jobs)", deleted);

    Ok(Json(DeleteResponse {
        ok: true,
        deleted: Some(deleted),
    }))
}
