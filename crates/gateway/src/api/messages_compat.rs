//! Typed-block `/v1/messages` facade.
//!
//! Message content arrives either as a plain string or as an array of
//! typed blocks; both are flattened to text at this edge before a run is
//! created. A separable `system` string is prepended to the input.
//! Streaming uses the typed-block dialect.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Map;

use arb_store::{Run, RunMode, RunStatus};

use crate::runtime::NewRun;
use crate::state::AppState;
use crate::stream::BlockBridge;

use super::run_event_stream;

const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);
const POLL_CEILING: std::time::Duration = std::time::Duration::from_secs(300);
const FACADE_TENANT: &str = "messages-api";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    #[serde(default)]
    pub system: Option<String>,
    pub messages: Vec<ApiMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: ApiContent,
}

/// Message content: a plain string or an array of typed blocks.
/// Destructured here; only a uniform string enters the runtime.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiContent {
    Text(String),
    Blocks(Vec<ApiBlock>),
}

#[derive(Debug, Deserialize)]
pub struct ApiBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl ApiContent {
    fn flatten(&self) -> String {
        match self {
            ApiContent::Text(text) => text.clone(),
            ApiContent::Blocks(blocks) => blocks
                .iter()
                .filter(|b| b.kind == "text")
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

fn last_user_message(messages: &[ApiMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.flatten())
}

fn facade_error(status: StatusCode, error_type: &str, message: &str) -> axum::response::Response {
    (
        status,
        Json(serde_json::json!({
            "type": "error",
            "error": { "type": error_type, "message": message }
        })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_message(
    State(state): State<AppState>,
    Json(body): Json<MessagesRequest>,
) -> impl IntoResponse {
    let Some(user_message) = last_user_message(&body.messages) else {
        return facade_error(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "No user message found in messages array",
        );
    };

    let input = match body.system.as_deref().filter(|s| !s.is_empty()) {
        Some(system) => format!("{system}\n\n{user_message}"),
        None => user_message,
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
            return facade_error(StatusCode::INTERNAL_SERVER_ERROR, "api_error", &e.to_string())
        }
    };

    if body.stream {
        stream_message(state, run, body.model)
    } else {
        blocking_message(state, run, body.model).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Non-streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn blocking_message(state: AppState, run: Run, model: String) -> axum::response::Response {
    let deadline = tokio::time::Instant::now() + POLL_CEILING;
    let run = loop {
        match state.manager.get_run(&run.id) {
            Ok(current) if current.status.is_terminal() => break current,
            Ok(_) if tokio::time::Instant::now() >= deadline => {
                return facade_error(
                    StatusCode::GATEWAY_TIMEOUT,
                    "timeout_error",
                    "run did not complete within the polling ceiling",
                );
            }
            Ok(_) => tokio::time::sleep(POLL_INTERVAL).await,
            Err(e) => {
                return facade_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "api_error",
                    &e.to_string(),
                )
            }
        }
    };

    if run.status != RunStatus::Completed {
        let message = run
            .error
            .unwrap_or_else(|| format!("run ended as {:?}", run.status));
        return facade_error(StatusCode::INTERNAL_SERVER_ERROR, "api_error", &message);
    }

    Json(serde_json::json!({
        "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": [{ "type": "text", "text": run.output }],
        "stop_reason": "end_turn",
        "usage": { "input_tokens": 0, "output_tokens": 0 },
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn stream_message(state: AppState, run: Run, model: String) -> axum::response::Response {
    let mut bridge = BlockBridge::new(model);
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

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
