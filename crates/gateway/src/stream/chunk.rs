//! Dialect 1 — chunk-delta (OpenAI `chat.completion.chunk` shaped).
//!
//! Each internal event maps to zero or one chunk; terminal events add the
//! literal `[DONE]` terminator.

use serde_json::{json, Value};

use arb_store::{Event, EventType};

use super::SseFrame;

pub struct ChunkBridge {
    id: String,
    created: i64,
    model: String,
}

impl ChunkBridge {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> SseFrame {
        let data = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        });
        SseFrame::data(data.to_string())
    }

    /// Translate one internal event into SSE frames.
    pub fn translate(&self, event: &Event) -> Vec<SseFrame> {
        match event.event_type {
            EventType::RunStarted => {
                vec![self.chunk(json!({ "role": "assistant" }), None)]
            }
            EventType::TextDelta => {
                let text = event.data.get("text").and_then(|v| v.as_str()).unwrap_or("");
                vec![self.chunk(json!({ "content": text }), None)]
            }
            EventType::RunPaused => vec![self.chunk(
                json!({ "content": "\n[Run paused. Waiting for resume or approval.]\n" }),
                None,
            )],
            EventType::RunResumed => {
                vec![self.chunk(json!({ "content": "\n[Run resumed.]\n" }), None)]
            }
            EventType::RunCompleted => vec![
                self.chunk(json!({}), Some("stop")),
                SseFrame::data("[DONE]"),
            ],
            EventType::RunFailed | EventType::RunCancelled => vec![
                self.chunk(json!({}), Some("error")),
                SseFrame::data("[DONE]"),
            ],
            _ => Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
