//! Native run API.
//!
//! - `POST /runs`              — create a run, spawn its executor
//! - `GET  /runs?session_id=`  — list a session's runs
//! - `GET  /runs/:id`          — fetch one run
//! - `GET  /runs/:id/events`   — SSE: historical events, then live
//! - `POST /runs/:id/cancel | /pause | /resume | /approve` — control

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};

use arb_store::RunMode;

use crate::runtime::NewRun;
use crate::state::AppState;

use super::{error_response, run_event_stream};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateRunBody {
    pub tenant_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub mode: RunMode,
    pub input: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

pub async fn create_run(
    State(state): State<AppState>,
    Json(body): Json<CreateRunBody>,
) -> impl IntoResponse {
    let req = NewRun {
        tenant_id: body.tenant_id,
        session_id: body.session_id,
        mode: body.mode,
        input: body.input,
        metadata: body.metadata,
    };
    match state.manager.create_run(req) {
        Ok(run) => (StatusCode::CREATED, Json(serde_json::json!(run))).into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub session_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(q): Query<ListRunsQuery>,
) -> impl IntoResponse {
    let mut runs = state.store.list_runs(&q.session_id);
    if let Some(status) = &q.status {
        runs.retain(|r| {
            serde_json::to_value(r.status)
                .ok()
                .and_then(|v| v.as_str().map(|s| s == status))
                .unwrap_or(false)
        });
    }
    Json(serde_json::json!({ "runs": runs, "count": runs.len() }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /runs/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> impl IntoResponse {
    match state.manager.get_run(&run_id) {
        Ok(run) => Json(serde_json::json!(run)).into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /runs/:id/events (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run_events(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.manager.get_run(&run_id) {
        return error_response(&e);
    }

    let events = run_event_stream(&state, &run_id);
    let stream = events.map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, std::convert::Infallible>(
            SseEvent::default().event(event.event_type.as_str()).data(data),
        )
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Control commands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn control_response(run_id: &str, status: &str) -> axum::response::Response {
    Json(serde_json::json!({ "status": status, "run_id": run_id })).into_response()
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> impl IntoResponse {
    match state.manager.cancel_run(&run_id) {
        Ok(()) => control_response(&run_id, "cancelling"),
        Err(e) => error_response(&e),
    }
}

pub async fn pause_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> impl IntoResponse {
    match state.manager.pause_run(&run_id) {
        Ok(()) => control_response(&run_id, "pausing"),
        Err(e) => error_response(&e),
    }
}

pub async fn resume_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> impl IntoResponse {
    match state.manager.resume_run(&run_id) {
        Ok(()) => control_response(&run_id, "resuming"),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    pub approved: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn approve_tool_call(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<ApproveBody>,
) -> impl IntoResponse {
    match state
        .manager
        .approve_tool_call(&run_id, body.approved, body.reason)
    {
        Ok(()) => control_response(&run_id, if body.approved { "approved" } else { "denied" }),
        Err(e) => error_response(&e),
    }
}
