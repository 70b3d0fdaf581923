//! Session inspection API.
//!
//! - `GET    /sessions?tenant_id=`     — list a tenant's sessions
//! - `DELETE /sessions/:id`            — delete with full cascade
//! - `GET    /sessions/:id/messages`   — conversation history
//! - `GET    /sessions/:id/runs`       — the session's runs

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::state::AppState;

use super::error_response;

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub tenant_id: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(q): Query<ListSessionsQuery>,
) -> impl IntoResponse {
    let sessions = state
        .store
        .list_sessions(&q.tenant_id, q.limit.min(200), q.offset);
    Json(serde_json::json!({ "sessions": sessions, "count": sessions.len() }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete_session(&session_id) {
        Ok(()) => Json(serde_json::json!({ "deleted": session_id })).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.store.get_session(&session_id) {
        return error_response(&e);
    }
    let messages = state.store.get_messages(&session_id);
    Json(serde_json::json!({ "messages": messages, "count": messages.len() })).into_response()
}

pub async fn list_runs(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.store.get_session(&session_id) {
        return error_response(&e);
    }
    let runs = state.store.list_runs(&session_id);
    Json(serde_json::json!({ "runs": runs, "count": runs.len() })).into_response()
}
