//! Deterministic model client for tests.
//!
//! Responses are queued up front and popped one per `chat` call; requests
//! are recorded so tests can assert on what the executor actually sent
//! (messages, tools, sampling parameters).

use std::collections::VecDeque;

use parking_lot::Mutex;

use arb_domain::stream::{BoxStream, FinishReason, StreamEvent};
use arb_domain::{Error, Result};

use crate::client::{ChatRequest, ChatResponse, ModelClient};

#[derive(Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<Result<ChatResponse>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a canned response.
    pub fn push(&self, resp: ChatResponse) {
        self.responses.lock().push_back(Ok(resp));
    }

    /// Queue a failure for the next call.
    pub fn push_error(&self, err: Error) {
        self.responses.lock().push_back(Err(err));
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    fn pop(&self, req: ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().push(req);
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Err(Error::Model {
                provider: "scripted".into(),
                message: "script exhausted: no response queued".into(),
            })
        })
    }
}

#[async_trait::async_trait]
impl ModelClient for ScriptedClient {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        self.pop(req)
    }

    async fn stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let resp = self.pop(req)?;
        let stream = async_stream::stream! {
            if !resp.content.is_empty() {
                yield Ok(StreamEvent::ContentDelta {
                    text: resp.content.clone(),
                });
            }
            for tc in resp.tool_calls.clone() {
                yield Ok(StreamEvent::ToolCall { tool_call: tc });
            }
            yield Ok(StreamEvent::Done {
                usage: resp.usage.clone(),
                finish_reason: if resp.tool_calls.is_empty() {
                    resp.finish_reason
                } else {
                    FinishReason::ToolCalls
                },
            });
        };
        Ok(Box::pin(stream))
    }
}
