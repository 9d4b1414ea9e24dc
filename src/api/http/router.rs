//! HTTP router composition

use axum::{
    extract::State,
    http::{header, Method},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::memory::{
    clear_thread_memory, get_thread_memory, memory_stats, search_thread_memory,
};
use super::refine::{refine_handler, refine_stream_handler};
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Create the router with all endpoints
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        // Refinement
        .route("/api/refine-requirements", post(refine_handler))
        .route("/api/refine-requirements/stream", post(refine_stream_handler))
        // Memory inspection
        .route("/memory/stats", get(memory_stats))
        .route(
            "/memory/{thread_id}",
            get(get_thread_memory).delete(clear_thread_memory),
        )
        .route("/memory/{thread_id}/search", get(search_thread_memory))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_handler(State(_state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
