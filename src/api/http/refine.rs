//! Refinement endpoints: batch and SSE streaming
//!
//! Both run the same engine. The batch handler drains the event stream and
//! answers once; the streaming handler forwards every event as an SSE
//! record and cancels the request when the client disconnects (the stream,
//! and with it the cancellation drop guard, is dropped).

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::str::FromStr;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::router::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::classify::{FocusHint, QueryKind};
use crate::memory::ConversationEntry;
use crate::orchestrator::{RefineEvent, RefineRequest};

#[derive(Debug, Deserialize)]
pub struct RefineApiRequest {
    pub query: String,
    pub thread_id: Option<String>,
    pub focus_hint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefineApiResponse {
    pub final_answer: String,
    pub processing_time_ms: u64,
    pub query_kind: QueryKind,
    pub is_followup: bool,
    pub specialist_outputs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderator_output: Option<String>,
    pub thread_id: String,
    pub entry_id: String,
}

impl From<ConversationEntry> for RefineApiResponse {
    fn from(entry: ConversationEntry) -> Self {
        Self {
            final_answer: entry.final_answer,
            processing_time_ms: entry.processing_time_ms,
            query_kind: entry.query_kind,
            is_followup: entry.is_followup,
            specialist_outputs: entry.specialist_outputs,
            moderator_output: entry.moderator_output,
            thread_id: entry.thread_id,
            entry_id: entry.entry_id,
        }
    }
}

fn parse_request(request: RefineApiRequest) -> ApiResult<RefineRequest> {
    let focus_hint = request
        .focus_hint
        .as_deref()
        .filter(|h| !h.is_empty())
        .map(FocusHint::from_str)
        .transpose()
        .map_err(ApiError::bad_request)?;

    Ok(RefineRequest {
        query: request.query,
        thread_id: request.thread_id,
        focus_hint,
    })
}

/// POST /api/refine-requirements
pub async fn refine_handler(
    State(state): State<AppState>,
    Json(request): Json<RefineApiRequest>,
) -> ApiResult<Json<RefineApiResponse>> {
    let engine_request = parse_request(request)?;
    info!(
        query_len = engine_request.query.len(),
        thread = engine_request.thread_id.as_deref().unwrap_or("<new>"),
        "Batch refinement request"
    );

    let cancel = CancellationToken::new();
    let mut events = state.orchestrator.run(engine_request, cancel);

    while let Some(event) = events.next().await {
        match event {
            RefineEvent::Complete { entry } => {
                return Ok(Json(RefineApiResponse::from(entry)));
            }
            RefineEvent::Error { kind, message } => {
                return Err(ApiError::from_event_kind(&kind, message));
            }
            RefineEvent::Cancelled => {
                return Err(ApiError::internal("request cancelled"));
            }
            _ => {}
        }
    }

    Err(ApiError::internal("event stream ended without a terminal event"))
}

/// POST /api/refine-requirements/stream
pub async fn refine_stream_handler(
    State(state): State<AppState>,
    Json(request): Json<RefineApiRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let parsed = parse_request(request);
    let cancel = CancellationToken::new();
    // Dropping the SSE stream (client gone) drops the guard and cancels
    // the in-flight request.
    let guard = cancel.clone().drop_guard();

    let stream = async_stream::stream! {
        let _guard = guard;
        match parsed {
            Err(e) => {
                let record = RefineEvent::Error {
                    kind: "invalid_input".to_string(),
                    message: e.message,
                };
                yield Ok(sse_record(&record));
            }
            Ok(engine_request) => {
                info!(
                    query_len = engine_request.query.len(),
                    thread = engine_request.thread_id.as_deref().unwrap_or("<new>"),
                    "Streaming refinement request"
                );
                let mut events = state.orchestrator.run(engine_request, cancel);
                while let Some(event) = events.next().await {
                    yield Ok(sse_record(&event));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn sse_record(event: &RefineEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().data(data)
}
