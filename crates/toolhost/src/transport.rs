//! Tool server transports.
//!
//! A transport is the capability set `{ request, notify, is_alive,
//! shutdown }`. [`StdioTransport`] runs a child process and speaks
//! newline-delimited JSON-RPC over its stdin/stdout; [`InProcessTransport`]
//! serves the same surface from closures for deterministic tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use arb_domain::config::ToolServerConfig;

use crate::protocol::{
    CallToolResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ToolSpec, ToolsListResult,
};

/// Trait for tool server transports.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Send a JSON-RPC request and wait for the matching response.
    async fn request(&self, method: &str, params: Option<Value>)
        -> Result<JsonRpcResponse, TransportError>;

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str) -> Result<(), TransportError>;

    /// Whether the transport can still serve requests.
    fn is_alive(&self) -> bool;

    /// Shut the transport down gracefully.
    async fn shutdown(&self) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tool server process has exited")]
    ProcessExited,

    #[error("unknown method: {0}")]
    UnknownMethod(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stdio transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maximum non-JSON stdout lines to skip before declaring the server broken.
const MAX_SKIP_LINES: usize = 1000;

/// Stdio transport: a child process driven over stdin/stdout.
///
/// Each JSON-RPC message is one newline-delimited line. `request_lock`
/// serializes full request/response cycles so concurrent callers cannot
/// read each other's responses.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
    request_lock: Mutex<()>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

impl StdioTransport {
    /// Spawn the configured subprocess with piped stdio.
    pub fn spawn(config: &ToolServerConfig) -> Result<Self, TransportError> {
        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(TransportError::Io)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdin",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture child stdout",
            ))
        })?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
            request_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    async fn write_line(&self, json: &str) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Read one JSON line from stdout, skipping empty or non-JSON lines
    /// (bounded, so a server that logs to stdout cannot spin us forever).
    async fn read_line(&self) -> Result<String, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        let mut stdout = self.stdout.lock().await;
        let mut skipped = 0usize;
        loop {
            let mut line = String::new();
            let bytes_read = stdout.read_line(&mut line).await?;
            if bytes_read == 0 {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::ProcessExited);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('{') {
                return Ok(trimmed.to_string());
            }
            skipped += 1;
            if skipped >= MAX_SKIP_LINES {
                self.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "tool server produced too many non-JSON lines on stdout",
                )));
            }
            tracing::debug!(line = %trimmed, "skipping non-JSON line from tool server stdout");
        }
    }
}

#[async_trait]
impl ToolTransport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        // Serialize the whole cycle so responses cannot be mismatched.
        let _guard = self.request_lock.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_string(&req)?;

        tracing::debug!(id, method, "sending tool server request");
        self.write_line(&json).await?;

        // Read until the response with our id arrives; servers may emit
        // notifications (no id) or stale responses in between.
        loop {
            let line = self.read_line().await?;
            if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&line) {
                if resp.id == id {
                    return Ok(resp);
                }
                tracing::debug!(expected_id = id, got_id = resp.id, "skipping stale response");
                continue;
            }
            tracing::debug!(line = %line, "skipping non-matching message from tool server");
        }
    }

    async fn notify(&self, method: &str) -> Result<(), TransportError> {
        let notif = JsonRpcNotification::new(method);
        let json = serde_json::to_string(&notif)?;
        tracing::debug!(method, "sending tool server notification");
        self.write_line(&json).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "error closing tool server stdin");
            }
        }
        let wait = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait()).await;
        match wait {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "tool server process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => {
                tracing::warn!("tool server did not exit within timeout, killing");
                child.kill().await.map_err(TransportError::Io)
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-process transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handler for one in-process tool.
pub type ToolHandler = Box<dyn Fn(Value) -> BoxFuture<'static, CallToolResult> + Send + Sync>;

/// The subprocess capability set served from closures. Used by tests and
/// anywhere a deterministic in-process server beats spawning a child.
#[derive(Default)]
pub struct InProcessTransport {
    tools: Vec<ToolSpec>,
    handlers: HashMap<String, ToolHandler>,
    closed: AtomicBool,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with an async handler.
    pub fn with_tool(
        mut self,
        spec: ToolSpec,
        handler: impl Fn(Value) -> BoxFuture<'static, CallToolResult> + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(spec.name.clone(), Box::new(handler));
        self.tools.push(spec);
        self
    }

    /// Register a tool with a synchronous handler.
    pub fn with_sync_tool(
        self,
        spec: ToolSpec,
        handler: impl Fn(Value) -> CallToolResult + Send + Sync + 'static,
    ) -> Self {
        self.with_tool(spec, move |args| {
            let result = handler(args);
            Box::pin(async move { result })
        })
    }
}

#[async_trait]
impl ToolTransport for InProcessTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        match method {
            "initialize" => Ok(JsonRpcResponse::ok(
                0,
                serde_json::json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "serverInfo": { "name": "in-process", "version": "0" }
                }),
            )),
            "tools/list" => {
                let result = ToolsListResult {
                    tools: self.tools.clone(),
                };
                Ok(JsonRpcResponse::ok(0, serde_json::to_value(result)?))
            }
            "tools/call" => {
                let params = params.unwrap_or(Value::Null);
                let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
                let arguments = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default()));
                match self.handlers.get(name) {
                    Some(handler) => {
                        let result = handler(arguments).await;
                        Ok(JsonRpcResponse::ok(0, serde_json::to_value(result)?))
                    }
                    None => Ok(JsonRpcResponse {
                        jsonrpc: "2.0".into(),
                        id: 0,
                        result: None,
                        error: Some(JsonRpcError {
                            code: -32601,
                            message: format!("unknown tool: {name}"),
                            data: None,
                        }),
                    }),
                }
            }
            other => Err(TransportError::UnknownMethod(other.to_string())),
        }
    }

    async fn notify(&self, _method: &str) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
