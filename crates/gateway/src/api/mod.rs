//! HTTP surface: the native run API, session inspection, the tool
//! catalog, and the two chat-completion facades.

pub mod messages_compat;
pub mod openai_compat;
pub mod runs;
pub mod sessions;
pub mod tools;

use std::collections::HashSet;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;
use futures_util::Stream;
use tower_http::cors::CorsLayer;

use arb_domain::Error;
use arb_store::Event;

use crate::state::AppState;

/// Build the full API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Native run API
        .route("/runs", post(runs::create_run).get(runs::list_runs))
        .route("/runs/:id", get(runs::get_run))
        .route("/runs/:id/events", get(runs::run_events))
        .route("/runs/:id/cancel", post(runs::cancel_run))
        .route("/runs/:id/pause", post(runs::pause_run))
        .route("/runs/:id/resume", post(runs::resume_run))
        .route("/runs/:id/approve", post(runs::approve_tool_call))
        // Sessions
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/:id", delete(sessions::delete_session))
        .route("/sessions/:id/messages", get(sessions::get_messages))
        .route("/sessions/:id/runs", get(sessions::list_runs))
        // Tools + health
        .route("/v1/tools", get(tools::list_tools))
        .route("/v1/health", get(tools::health))
        // Chat facades
        .route("/v1/chat/completions", post(openai_compat::chat_completions))
        .route("/v1/messages", post(messages_compat::create_message))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Map a domain error onto an HTTP response: `{ "error": "<message>" }`.
pub(crate) fn error_response(err: &Error) -> axum::response::Response {
    let status = match err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Invalid(_) => StatusCode::BAD_REQUEST,
        Error::NotActive(_) => StatusCode::CONFLICT,
        Error::Denied(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() })))
        .into_response()
}

/// Historical-then-live event feed for a run.
///
/// Subscribes before reading history so nothing published in between is
/// missed; live events already seen in history are skipped by id. The
/// stream ends after the terminal event (or immediately after history when
/// the run is already terminal).
pub(crate) fn run_event_stream(
    state: &AppState,
    run_id: &str,
) -> impl Stream<Item = Event> + Send + 'static {
    let subscription = state.manager.subscribe(run_id);
    let history = state.manager.get_events(run_id);

    async_stream::stream! {
        let mut seen: HashSet<String> = HashSet::new();
        let mut terminal = false;
        for event in history {
            seen.insert(event.id.clone());
            terminal = event.event_type.is_terminal();
            yield event;
            if terminal {
                break;
            }
        }

        let mut rx = subscription.rx;
        if !terminal {
            while let Some(event) = rx.recv().await {
                if seen.contains(&event.id) {
                    continue;
                }
                let is_terminal = event.event_type.is_terminal();
                yield event;
                if is_terminal {
                    break;
                }
            }
        }
    }
}
