//! Dialect 2 — typed blocks.
//!
//! A small state machine around a single text content block:
//! `message_start` once, `content_block_start` on the first text delta,
//! deltas thereafter, tool activity as vendor-agnostic `agent_tool`
//! records, and a deterministic `message_delta` + `message_stop` tail.

use serde_json::json;

use arb_store::{Event, EventType};

use super::SseFrame;

pub struct BlockBridge {
    model: String,
    message_id: String,
    started: bool,
    block_open: bool,
}

impl BlockBridge {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            started: false,
            block_open: false,
        }
    }

    /// Translate one internal event into SSE frames, advancing the block
    /// state machine.
    pub fn translate(&mut self, event: &Event) -> Vec<SseFrame> {
        match event.event_type {
            EventType::RunStarted => {
                if self.started {
                    return Vec::new();
                }
                self.started = true;
                let data = json!({
                    "type": "message_start",
                    "message": {
                        "id": self.message_id,
                        "type": "message",
                        "role": "assistant",
                        "model": self.model,
                        "content": [],
                    },
                });
                vec![SseFrame::named("message_start", data.to_string())]
            }
            EventType::TextDelta => {
                let text = event.data.get("text").and_then(|v| v.as_str()).unwrap_or("");
                let mut frames = Vec::new();
                if !self.block_open {
                    self.block_open = true;
                    let start = json!({
                        "type": "content_block_start",
                        "index": 0,
                        "content_block": { "type": "text", "text": "" },
                    });
                    frames.push(SseFrame::named("content_block_start", start.to_string()));
                }
                let delta = json!({
                    "type": "content_block_delta",
                    "index": 0,
                    "delta": { "type": "text_delta", "text": text },
                });
                frames.push(SseFrame::named("content_block_delta", delta.to_string()));
                frames
            }
            EventType::ToolStarted => vec![self.agent_tool(event, "started")],
            EventType::ToolCompleted => vec![self.agent_tool(event, "completed")],
            EventType::ToolFailed => vec![self.agent_tool(event, "failed")],
            EventType::RunCompleted => {
                let mut frames = Vec::new();
                if self.block_open {
                    self.block_open = false;
                    let stop = json!({ "type": "content_block_stop", "index": 0 });
                    frames.push(SseFrame::named("content_block_stop", stop.to_string()));
                }
                let delta = json!({
                    "type": "message_delta",
                    "delta": { "stop_reason": "end_turn" },
                });
                frames.push(SseFrame::named("message_delta", delta.to_string()));
                frames.push(SseFrame::named(
                    "message_stop",
                    json!({ "type": "message_stop" }).to_string(),
                ));
                frames
            }
            EventType::RunFailed | EventType::RunCancelled => {
                let delta = json!({
                    "type": "message_delta",
                    "delta": { "stop_reason": "error" },
                });
                vec![
                    SseFrame::named("message_delta", delta.to_string()),
                    SseFrame::named(
                        "message_stop",
                        json!({ "type": "message_stop" }).to_string(),
                    ),
                ]
            }
            _ => Vec::new(),
        }
    }

    fn agent_tool(&self, event: &Event, status: &str) -> SseFrame {
        let mut data = json!({
            "type": "agent_tool",
            "status": status,
            "tool_name": event.data.get("tool_name").cloned().unwrap_or_default(),
            "tool_call_id": event.data.get("tool_call_id").cloned().unwrap_or_default(),
        });
        if let Some(args) = event.data.get("arguments") {
            data["arguments"] = args.clone();
        }
        if let Some(output) = event.data.get("output") {
            data["output"] = output.clone();
        }
        if let Some(error) = event.data.get("error") {
            data["error"] = error.clone();
        }
        SseFrame::named("agent_tool", data.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
