//! The tool registry — holds all tool server connections, caches their
//! catalogs, and routes invocations with authorization and timeouts.

use serde_json::Value;
use tokio::sync::RwLock;

use arb_domain::config::{ToolRuleConfig, ToolServerConfig};
use arb_domain::tool::{blocks_text, ContentBlock, ToolDefinition};
use arb_domain::{Error, Result};

use crate::authz::{self, Authorization};
use crate::protocol::{self, CallToolResult, ToolSpec, ToolsListResult};
use crate::transport::{StdioTransport, ToolTransport};

/// Handshake steps get a fixed ceiling; per-call timeouts come from config.
const HANDSHAKE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolServer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One connected tool server with its cached catalog.
struct ToolServer {
    name: String,
    tools: Vec<ToolSpec>,
    transport: Box<dyn ToolTransport>,
}

/// The normalized result of a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub content: Vec<ContentBlock>,
    /// The server reported the call as failed; the block list still carries
    /// whatever it produced.
    pub is_error: bool,
}

impl ToolOutcome {
    /// Combined text of all text blocks.
    pub fn text(&self) -> String {
        blocks_text(&self.content)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ToolRegistry {
    servers: RwLock<Vec<ToolServer>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn and attach a subprocess tool server.
    pub async fn load_server(&self, config: &ToolServerConfig) -> Result<()> {
        let transport = StdioTransport::spawn(config)
            .map_err(|e| Error::Other(format!("tool server '{}' unloadable: {e}", config.name)))?;
        self.attach(&config.name, Box::new(transport)).await
    }

    /// Attach a server over any transport: handshake, discover tools, cache
    /// the catalog. Any failing step tears the transport down and reports
    /// the server as unloadable. Replaces an existing server of the same
    /// name.
    pub async fn attach(&self, name: &str, transport: Box<dyn ToolTransport>) -> Result<()> {
        let tools = match Self::handshake(name, transport.as_ref()).await {
            Ok(tools) => tools,
            Err(e) => {
                let _ = transport.shutdown().await;
                return Err(e);
            }
        };

        tracing::info!(server = name, tool_count = tools.len(), "tool server ready");

        let mut servers = self.servers.write().await;
        if let Some(pos) = servers.iter().position(|s| s.name == name) {
            let old = servers.remove(pos);
            let _ = old.transport.shutdown().await;
        }
        servers.push(ToolServer {
            name: name.to_string(),
            tools,
            transport,
        });
        Ok(())
    }

    async fn handshake(name: &str, transport: &dyn ToolTransport) -> Result<Vec<ToolSpec>> {
        let unloadable =
            |msg: String| Error::Other(format!("tool server '{name}' unloadable: {msg}"));

        let params = serde_json::to_value(protocol::initialize_params())?;
        let resp = tokio::time::timeout(HANDSHAKE_TIMEOUT, transport.request("initialize", Some(params)))
            .await
            .map_err(|_| unloadable("initialize timed out".into()))?
            .map_err(|e| unloadable(e.to_string()))?;
        resp.into_result()
            .map_err(|e| unloadable(format!("initialize failed: {e}")))?;

        transport
            .notify("notifications/initialized")
            .await
            .map_err(|e| unloadable(e.to_string()))?;

        let resp = tokio::time::timeout(HANDSHAKE_TIMEOUT, transport.request("tools/list", None))
            .await
            .map_err(|_| unloadable("tools/list timed out".into()))?
            .map_err(|e| unloadable(e.to_string()))?;
        let result = resp
            .into_result()
            .map_err(|e| unloadable(format!("tools/list failed: {e}")))?;
        let list: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| unloadable(format!("bad tools/list result: {e}")))?;

        Ok(list.tools)
    }

    /// Load every configured server, skipping (and logging) failures.
    /// Returns the number successfully loaded.
    pub async fn load_all(&self, configs: &[ToolServerConfig]) -> usize {
        let mut loaded = 0;
        for config in configs {
            tracing::info!(server = %config.name, command = %config.command, "loading tool server");
            match self.load_server(config).await {
                Ok(()) => loaded += 1,
                Err(e) => {
                    tracing::warn!(server = %config.name, error = %e, "failed to load tool server, skipping");
                }
            }
        }
        loaded
    }

    // ── Catalog views ─────────────────────────────────────────────

    /// All tools across all servers, as `(server_name, spec)` pairs.
    pub async fn list_tools(&self) -> Vec<(String, ToolSpec)> {
        let servers = self.servers.read().await;
        servers
            .iter()
            .flat_map(|s| s.tools.iter().map(|t| (s.name.clone(), t.clone())))
            .collect()
    }

    /// The catalog sent to the model: each server's tools filtered through
    /// the matching rule's allow/deny lists. Servers without a rule entry
    /// pass through unfiltered.
    pub async fn list_tools_filtered(&self, rules: &[ToolRuleConfig]) -> Vec<ToolDefinition> {
        let servers = self.servers.read().await;
        let mut defs = Vec::new();
        for server in servers.iter() {
            let rule = rules.iter().find(|r| r.server_name == server.name);
            for tool in &server.tools {
                if let Some(rule) = rule {
                    if !authz::list_allows(&tool.name, rule) {
                        continue;
                    }
                }
                defs.push(ToolDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                });
            }
        }
        defs
    }

    /// First tool matching `name` across servers, with its server name.
    pub async fn get_tool(&self, name: &str) -> Result<(String, ToolSpec)> {
        let servers = self.servers.read().await;
        for server in servers.iter() {
            if let Some(tool) = server.tools.iter().find(|t| t.name == name) {
                return Ok((server.name.clone(), tool.clone()));
            }
        }
        Err(Error::NotFound(format!("tool {name}")))
    }

    pub async fn server_count(&self) -> usize {
        self.servers.read().await.len()
    }

    pub async fn tool_count(&self) -> usize {
        self.servers.read().await.iter().map(|s| s.tools.len()).sum()
    }

    // ── Invocation ────────────────────────────────────────────────

    /// Invoke a tool by name.
    ///
    /// Authorization runs first when a rule is present: a denied tool fails
    /// synchronously and the subprocess is never contacted. Consent
    /// requirements are the executor's concern — by the time a call reaches
    /// the registry, any required approval has been granted.
    ///
    /// The call is bounded by the rule's timeout and retried immediately up
    /// to `rule.retries` times on subprocess failure.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        rule: Option<&ToolRuleConfig>,
    ) -> Result<ToolOutcome> {
        let servers = self.servers.read().await;
        let server = servers
            .iter()
            .find(|s| s.tools.iter().any(|t| t.name == name))
            .ok_or_else(|| Error::NotFound(format!("tool {name}")))?;

        if let Some(rule) = rule {
            if let Authorization::Denied { reason } = authz::authorize(name, &arguments, rule) {
                return Err(Error::Denied(reason));
            }
        }

        let timeout_secs = rule
            .map(|r| r.timeout_secs)
            .unwrap_or(DEFAULT_CALL_TIMEOUT_SECS);
        let timeout = std::time::Duration::from_secs(timeout_secs);
        let attempts = rule.map(|r| r.retries).unwrap_or(0) + 1;

        let params = serde_json::json!({ "name": name, "arguments": arguments });

        let mut last_err = Error::Tool {
            tool: name.into(),
            message: "no attempt made".into(),
        };
        for attempt in 0..attempts {
            if attempt > 0 {
                tracing::debug!(tool = name, attempt, "retrying tool call");
            }
            let call = server.transport.request("tools/call", Some(params.clone()));
            match tokio::time::timeout(timeout, call).await {
                Err(_) => {
                    last_err = Error::Timeout(format!("tool {name} after {timeout_secs}s"));
                }
                Ok(Err(e)) => {
                    last_err = Error::Tool {
                        tool: name.into(),
                        message: e.to_string(),
                    };
                }
                Ok(Ok(resp)) => match resp.into_result() {
                    Err(e) => {
                        last_err = Error::Tool {
                            tool: name.into(),
                            message: e.to_string(),
                        };
                    }
                    Ok(result) => {
                        let parsed: CallToolResult = serde_json::from_value(result)
                            .map_err(|e| Error::Tool {
                                tool: name.into(),
                                message: format!("bad tools/call result: {e}"),
                            })?;
                        return Ok(ToolOutcome {
                            content: parsed.content,
                            is_error: parsed.is_error,
                        });
                    }
                },
            }
        }
        Err(last_err)
    }

    // ── Shutdown ──────────────────────────────────────────────────

    /// Terminate all servers, collecting errors into one aggregate.
    pub async fn close(&self) -> Result<()> {
        let servers: Vec<ToolServer> = self.servers.write().await.drain(..).collect();
        let mut failures = Vec::new();
        let results = futures_util::future::join_all(
            servers.iter().map(|s| s.transport.shutdown()),
        )
        .await;
        for (server, result) in servers.iter().zip(results) {
            if let Err(e) = result {
                failures.push(format!("{}: {e}", server.name));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "tool server shutdown failures: {}",
                failures.join("; ")
            )))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
