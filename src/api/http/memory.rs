//! Memory inspection endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::router::AppState;
use crate::api::error::{ApiResult, IntoApiError};

const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<usize>,
}

/// GET /memory/{thread_id}?limit=N
pub async fn get_thread_memory(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(params): Query<LimitQuery>,
) -> ApiResult<Json<Value>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let entries = state
        .orchestrator
        .history(&thread_id, limit)
        .await
        .into_api_error("Failed to fetch thread history")?;
    let stats = state
        .orchestrator
        .memory_stats()
        .await
        .into_api_error("Failed to fetch memory stats")?;

    Ok(Json(json!({ "entries": entries, "stats": stats })))
}

/// GET /memory/{thread_id}/search?q=...&limit=N
pub async fn search_thread_memory(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<Json<Value>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let results = state
        .orchestrator
        .search(&thread_id, &params.q, limit)
        .await
        .into_api_error("Failed to search thread history")?;

    Ok(Json(json!({ "results": results })))
}

/// DELETE /memory/{thread_id}
pub async fn clear_thread_memory(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let count = state
        .orchestrator
        .clear(&thread_id)
        .await
        .into_api_error("Failed to clear thread")?;

    info!(%thread_id, count, "Cleared thread memory");
    Ok(Json(json!({ "cleared": true, "count": count })))
}

/// GET /memory/stats
pub async fn memory_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stats = state
        .orchestrator
        .memory_stats()
        .await
        .into_api_error("Failed to fetch memory stats")?;

    Ok(Json(serde_json::to_value(stats).unwrap_or(json!({}))))
}
