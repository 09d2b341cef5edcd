//! API route definitions.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::state::AppState;
use crate::event::{Event, EventId, Subject};
use crate::pipeline::PipelineError;
use crate::storage::dead_letter;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(submit_event))
        .route("/status", get(status))
        .route("/dead-letters", get(list_dead_letters))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

#[derive(Debug, Deserialize)]
struct SubmitEventDto {
    identifier: String,
    timestamp: Option<DateTime<Utc>>,
    subject: SubjectDto,
    #[serde(default)]
    criteria: HashMap<String, String>,
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SubjectDto {
    object_id: String,
    object_type: String,
}

/// Fire-and-forget event submission: validate eagerly, enqueue, return.
async fn submit_event(
    State(state): State<AppState>,
    Json(dto): Json<SubmitEventDto>,
) -> (StatusCode, Json<Value>) {
    let id: EventId = match dto.identifier.parse() {
        Ok(id) => id,
        Err(e) => return bad_request(e.to_string()),
    };

    let mut event = Event::new(
        id,
        dto.timestamp.unwrap_or_else(Utc::now),
        Subject {
            object_id: dto.subject.object_id,
            object_type: dto.subject.object_type,
        },
    );
    for (kind, value) in dto.criteria {
        match kind.parse() {
            Ok(kind) => {
                event = event.with_criteria(kind, value);
            }
            Err(e) => return bad_request(e.to_string()),
        }
    }
    if let Some(payload) = dto.payload {
        event = event.with_payload(payload);
    }

    match state.pipeline.submit(event).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({ "data": { "accepted": true } })),
        ),
        Err(e @ (PipelineError::Taxonomy(_) | PipelineError::Canonical(_))) => {
            bad_request(e.to_string())
        }
        Err(e @ (PipelineError::NotRunning | PipelineError::Draining)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "data": state.pipeline.status() }))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn list_dead_letters(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> (StatusCode, Json<Value>) {
    match dead_letter::list_recent(&state.pool, q.limit) {
        Ok(records) => {
            let total = records.len();
            (
                StatusCode::OK,
                Json(json!({ "data": records, "meta": { "total": total } })),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

fn bad_request(message: String) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}
