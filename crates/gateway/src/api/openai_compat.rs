//! OpenAI-compatible `/v1/chat/completions` facade.
//!
//! Accepts the standard chat-completion request shape, turns the last user
//! message into a run, and answers either by polling the run to completion
//! (non-streaming) or by bridging run events through the chunk-delta
//! dialect (streaming). Sampling fields are accepted for wire
//! compatibility; the run's config snapshot governs the actual call.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};

use arb_store::{Run, RunMode, RunStatus};

use crate::runtime::NewRun;
use crate::state::AppState;
use crate::stream::ChunkBridge;

use super::run_event_stream;

/// Poll cadence and ceiling for non-streaming completions.
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);
const POLL_CEILING: std::time::Duration = std::time::Duration::from_secs(300);

/// Tenant under which facade-created runs are filed.
const FACADE_TENANT: &str = "chat-api";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: String,
}

fn last_user_message(messages: &[ApiMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
}

fn facade_error(status: StatusCode, error_type: &str, message: &str) -> axum::response::Response {
    (
        status,
        Json(serde_json::json!({
            "error": { "message": message, "type": error_type }
        })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/chat/completions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_completions(
    State(state): State<AppState>,
    Json(body): Json<ChatCompletionRequest>,
) -> impl IntoResponse {
    let Some(input) = last_user_message(&body.messages) else {
        return facade_error(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "No user message found in messages array",
        );
    };

    let run = match state.manager.create_run(NewRun {
        tenant_id: FACADE_TENANT.into(),
        session_id: None,
        mode: RunMode::Interactive,
        input,
        metadata: Map::new(),
    }) {
        Ok(run) => run,
        Err(e) => {
            return facade_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                &e.to_string(),
            )
        }
    };

    if body.stream {
        stream_completion(state, run, body.model)
    } else {
        blocking_completion(state, run, body.model).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Non-streaming: poll the run to a terminal state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn poll_run(state: &AppState, run_id: &str) -> Result<Run, axum::response::Response> {
    let deadline = tokio::time::Instant::now() + POLL_CEILING;
    loop {
        let run = state.manager.get_run(run_id).map_err(|e| {
            facade_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                &e.to_string(),
            )
        })?;
        if run.status.is_terminal() {
            return Ok(run);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(facade_error(
                StatusCode::GATEWAY_TIMEOUT,
                "timeout_error",
                "run did not complete within the polling ceiling",
            ));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn blocking_completion(
    state: AppState,
    run: Run,
    model: String,
) -> axum::response::Response {
    let run = match poll_run(&state, &run.id).await {
        Ok(run) => run,
        Err(resp) => return resp,
    };

    if run.status != RunStatus::Completed {
        let message = run
            .error
            .unwrap_or_else(|| format!("run ended as {:?}", run.status));
        return facade_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", &message);
    }

    Json(serde_json::json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": run.output },
            "finish_reason": "stop",
        }],
        "usage": { "prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0 },
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming: bridge run events through the chunk-delta dialect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn stream_completion(state: AppState, run: Run, model: String) -> axum::response::Response {
    let bridge = ChunkBridge::new(model);
    let events = run_event_stream(&state, &run.id);

    let stream = events.flat_map(move |event| {
        let frames = bridge.translate(&event);
        futures_util::stream::iter(frames.into_iter().map(|frame| {
            let mut sse = SseEvent::default();
            if let Some(name) = frame.event {
                sse = sse.event(name);
            }
            Ok::<_, std::convert::Infallible>(sse.data(frame.data))
        }))
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}
