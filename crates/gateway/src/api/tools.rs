//! Tool catalog and health endpoints.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// `GET /v1/tools` — every tool across loaded servers.
pub async fn list_tools(State(state): State<AppState>) -> impl IntoResponse {
    let tools: Vec<_> = state
        .registry
        .list_tools()
        .await
        .into_iter()
        .map(|(server, tool)| {
            serde_json::json!({
                "server": server,
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema,
            })
        })
        .collect();
    Json(serde_json::json!({ "tools": tools, "count": tools.len() }))
}

/// `GET /v1/health` — liveness plus a few counters.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "active_runs": state.manager.active_count(),
        "tool_servers": state.registry.server_count().await,
        "tools": state.registry.tool_count().await,
    }))
}
