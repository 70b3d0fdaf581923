use arb_domain::message::{Message, ToolCallRef};
use arb_domain::stream::{BoxStream, FinishReason, StreamEvent, Usage};
use arb_domain::tool::ToolDefinition;
use arb_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A vendor-agnostic chat completion request. Sampling parameters come from
/// the run's config snapshot.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke (filtered registry catalog).
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Model identifier override. `None` = client default.
    pub model: Option<String>,
}

/// A vendor-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCallRef>,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// A plain text response that ends the turn.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: None,
        }
    }

    /// A response requesting the given tool calls.
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRef>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            finish_reason: FinishReason::ToolCalls,
            usage: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The contract every model adapter implements. No agent logic lives behind
/// this trait — it is a thin wire translation layer.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    /// Send a request and wait for the complete response.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// Send a request and yield a finite event sequence ending in
    /// `Done` or `Error`.
    async fn stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}
