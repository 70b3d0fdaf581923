use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::message::ToolCallRef;

/// A boxed async stream, used for model streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    EndTurn,
    ToolCalls,
    Length,
    Error,
}

impl FinishReason {
    /// Reasons that terminate the reasoning loop when no tool calls remain.
    pub fn is_done(self) -> bool {
        matches!(self, FinishReason::Stop | FinishReason::EndTurn)
    }
}

/// Events yielded by a streaming model response. The sequence is finite and
/// ends with `Done` or `Error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    ContentDelta {
        text: String,
    },
    ToolCall {
        tool_call: ToolCallRef,
    },
    Done {
        usage: Option<Usage>,
        finish_reason: FinishReason,
    },
    Error {
        message: String,
    },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
