use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
///
/// Embedded in an assistant [`Message`]; a later message with
/// `role = Tool` whose first ref carries the same `id` holds the result.
/// `arguments` is the raw JSON text exactly as the model produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRef {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallRef {
    /// Parse `arguments` as JSON, defaulting to an empty object when the
    /// model emitted nothing or invalid JSON.
    pub fn arguments_value(&self) -> serde_json::Value {
        if self.arguments.trim().is_empty() {
            return serde_json::Value::Object(Default::default());
        }
        serde_json::from_str(&self.arguments)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }
}

/// A message in a session's conversation. Append-only; insertion order is
/// the logical conversation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRef>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(session_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn system(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(session_id, Role::System, text)
    }

    pub fn user(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(session_id, Role::User, text)
    }

    pub fn assistant(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(session_id, Role::Assistant, text)
    }

    pub fn assistant_with_calls(
        session_id: impl Into<String>,
        text: impl Into<String>,
        tool_calls: Vec<ToolCallRef>,
    ) -> Self {
        let mut msg = Self::new(session_id, Role::Assistant, text);
        msg.tool_calls = tool_calls;
        msg
    }

    /// A tool-role message carrying the result of `call`.
    pub fn tool_result(
        session_id: impl Into<String>,
        call: &ToolCallRef,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(session_id, Role::Tool, content);
        msg.tool_calls = vec![call.clone()];
        msg
    }

    /// The tool-call id this message answers, when `role = Tool`.
    pub fn answers_call(&self) -> Option<&str> {
        if self.role != Role::Tool {
            return None;
        }
        self.tool_calls.first().map(|c| c.id.as_str())
    }
}
