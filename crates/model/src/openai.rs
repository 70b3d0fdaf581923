//! OpenAI-compatible adapter.
//!
//! Works with OpenAI and any endpoint following the chat-completions
//! contract (Azure-style URL layouts excluded). Translates the internal
//! message model to the wire format and back; streaming assembles
//! index-fragmented tool calls before surfacing them as whole events.

use std::collections::BTreeMap;

use serde_json::Value;

use arb_domain::config::ModelConfig;
use arb_domain::message::{Message, Role, ToolCallRef};
use arb_domain::stream::{BoxStream, FinishReason, StreamEvent, Usage};
use arb_domain::tool::ToolDefinition;
use arb_domain::{Error, Result};

use crate::client::{ChatRequest, ChatResponse, ModelClient};
use crate::sse;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let base_url = cfg
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.into())
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            base_url,
            api_key: cfg.api_key.clone(),
            default_model: cfg.model.clone(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(top_p) = req.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.answers_call().unwrap_or(""),
            "content": msg.content,
        }),
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments,
                        }
                    })
                })
                .collect();
            let content = if msg.content.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            serde_json::json!({
                "role": "assistant",
                "content": content,
                "tool_calls": calls,
            })
        }
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content,
        }),
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn map_finish_reason(s: &str) -> FinishReason {
    match s {
        "stop" => FinishReason::Stop,
        "end_turn" => FinishReason::EndTurn,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "length" => FinishReason::Length,
        "error" => FinishReason::Error,
        _ => FinishReason::Stop,
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCallRef> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let name = func.get("name")?.as_str()?.to_string();
            let arguments = func
                .get("arguments")
                .and_then(|v| v.as_str())
                .unwrap_or("{}")
                .to_string();
            Some(ToolCallRef {
                id,
                name,
                arguments,
            })
        })
        .collect()
}

fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Model {
            provider: "openai".into(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Model {
        provider: "openai".into(),
        message: "no message in choice".into(),
    })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let tool_calls = parse_tool_calls(message);

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(map_finish_reason)
        .unwrap_or(if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });

    let usage = body.get("usage").and_then(parse_usage);

    Ok(ChatResponse {
        content,
        tool_calls,
        finish_reason,
        usage,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assembly state for index-fragmented streaming tool calls.
#[derive(Default)]
struct StreamState {
    /// index -> (id, name, accumulated argument JSON text)
    calls: BTreeMap<u64, (String, String, String)>,
    usage: Option<Usage>,
}

impl StreamState {
    /// Parse one `data:` payload into zero or more stream events.
    fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if data.trim() == "[DONE]" {
            // Normal streams emit a finish_reason chunk first; the sentinel
            // alone only matters if the server skipped it.
            return Vec::new();
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        let choice = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first());

        let Some(choice) = choice else {
            // Usage-only chunk (stream_options.include_usage).
            if let Some(usage) = v.get("usage").and_then(parse_usage) {
                self.usage = Some(usage);
            }
            return Vec::new();
        };

        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            let mut events: Vec<Result<StreamEvent>> = self
                .flush_calls()
                .into_iter()
                .map(|tc| Ok(StreamEvent::ToolCall { tool_call: tc }))
                .collect();
            let usage = v.get("usage").and_then(parse_usage).or(self.usage.take());
            events.push(Ok(StreamEvent::Done {
                usage,
                finish_reason: map_finish_reason(fr),
            }));
            return events;
        }

        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(fragments) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for frag in fragments {
                let index = frag.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                let entry = self.calls.entry(index).or_default();
                if let Some(id) = frag.get("id").and_then(|v| v.as_str()) {
                    entry.0 = id.to_string();
                }
                if let Some(name) = frag
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                {
                    entry.1.push_str(name);
                }
                if let Some(args) = frag
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|v| v.as_str())
                {
                    entry.2.push_str(args);
                }
            }
            return Vec::new();
        }

        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                return vec![Ok(StreamEvent::ContentDelta {
                    text: text.to_string(),
                })];
            }
        }

        Vec::new()
    }

    fn flush_calls(&mut self) -> Vec<ToolCallRef> {
        std::mem::take(&mut self.calls)
            .into_values()
            .map(|(id, name, arguments)| ToolCallRef {
                id,
                name,
                arguments,
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ModelClient for OpenAiClient {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req, false);

        tracing::debug!(url = %url, "chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Model {
                provider: "openai".into(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        let json: Value = serde_json::from_str(&text)?;
        parse_chat_response(&json)
    }

    async fn stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req, true);

        tracing::debug!(url = %url, "stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
            return Err(Error::Model {
                provider: "openai".into(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }

        let mut state = StreamState::default();
        Ok(sse::sse_response_stream(resp, move |data| {
            state.parse(data)
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_to_wire() {
        let msg = Message::user("s1", "hello");
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"], "hello");
    }

    #[test]
    fn assistant_with_calls_to_wire() {
        let msg = Message::assistant_with_calls(
            "s1",
            "",
            vec![ToolCallRef {
                id: "tc1".into(),
                name: "echo".into(),
                arguments: r#"{"message":"hi"}"#.into(),
            }],
        );
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["role"], "assistant");
        assert!(wire["content"].is_null());
        assert_eq!(wire["tool_calls"][0]["id"], "tc1");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "echo");
        assert_eq!(
            wire["tool_calls"][0]["function"]["arguments"],
            r#"{"message":"hi"}"#
        );
    }

    #[test]
    fn tool_result_to_wire_carries_call_id() {
        let call = ToolCallRef {
            id: "tc7".into(),
            name: "read".into(),
            arguments: "{}".into(),
        };
        let msg = Message::tool_result("s1", &call, "data");
        let wire = msg_to_wire(&msg);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "tc7");
        assert_eq!(wire["content"], "data");
    }

    #[test]
    fn parse_plain_response() {
        let body = serde_json::json!({
            "model": "gpt-4o",
            "choices": [{
                "message": { "role": "assistant", "content": "pong" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4 }
        });
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.content, "pong");
        assert_eq!(resp.finish_reason, FinishReason::Stop);
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.usage.unwrap().total_tokens, 4);
    }

    #[test]
    fn parse_tool_call_response() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "tc1",
                        "type": "function",
                        "function": { "name": "echo", "arguments": "{\"message\":\"hi\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let resp = parse_chat_response(&body).unwrap();
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "echo");
        assert_eq!(resp.tool_calls[0].arguments, "{\"message\":\"hi\"}");
    }

    #[test]
    fn parse_response_without_choices_fails() {
        let body = serde_json::json!({ "error": { "message": "overloaded" } });
        assert!(parse_chat_response(&body).is_err());
    }

    #[test]
    fn stream_text_then_finish() {
        let mut state = StreamState::default();
        let events = state.parse(r#"{"choices":[{"delta":{"content":"he"}}]}"#);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::ContentDelta { text } if text == "he"
        ));

        let events = state.parse(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Done { finish_reason: FinishReason::Stop, .. }
        ));
    }

    #[test]
    fn stream_assembles_fragmented_tool_call() {
        let mut state = StreamState::default();
        assert!(state
            .parse(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"tc1","function":{"name":"echo","arguments":""}}]}}]}"#)
            .is_empty());
        assert!(state
            .parse(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"message\":"}}]}}]}"#)
            .is_empty());
        assert!(state
            .parse(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"hi\"}"}}]}}]}"#)
            .is_empty());

        let events = state.parse(r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#);
        assert_eq!(events.len(), 2);
        match events[0].as_ref().unwrap() {
            StreamEvent::ToolCall { tool_call } => {
                assert_eq!(tool_call.id, "tc1");
                assert_eq!(tool_call.name, "echo");
                assert_eq!(tool_call.arguments, "{\"message\":\"hi\"}");
            }
            other => panic!("expected ToolCall, got {other:?}"),
        }
        assert!(matches!(
            events[1].as_ref().unwrap(),
            StreamEvent::Done { finish_reason: FinishReason::ToolCalls, .. }
        ));
    }

    #[test]
    fn stream_usage_only_chunk_buffers_usage() {
        let mut state = StreamState::default();
        assert!(state
            .parse(r#"{"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#)
            .is_empty());
        let events = state.parse(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        match events[0].as_ref().unwrap() {
            StreamEvent::Done { usage, .. } => {
                assert_eq!(usage.as_ref().unwrap().total_tokens, 7);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(map_finish_reason("stop"), FinishReason::Stop);
        assert_eq!(map_finish_reason("end_turn"), FinishReason::EndTurn);
        assert_eq!(map_finish_reason("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(map_finish_reason("length"), FinishReason::Length);
        assert_eq!(map_finish_reason("weird"), FinishReason::Stop);
    }
}
