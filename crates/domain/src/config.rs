//! Agent configuration surface.
//!
//! Deserialized from TOML at startup. The executor takes a deep clone of
//! [`AgentConfig`] when a run starts; an in-flight run never observes later
//! configuration changes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub prompting: PromptConfig,
    /// Tool server subprocess launch specs.
    #[serde(default)]
    pub servers: Vec<ToolServerConfig>,
    /// Per-server authorization / redaction / timeout rules.
    #[serde(default)]
    pub tools: Vec<ToolRuleConfig>,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub budgets: BudgetConfig,
}

impl AgentConfig {
    /// The rule entry matching a tool server, if configured.
    pub fn rule_for(&self, server_name: &str) -> Option<&ToolRuleConfig> {
        self.tools.iter().find(|t| t.server_name == server_name)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model selection + sampling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "d_provider")]
    pub provider: String,
    #[serde(default = "d_model")]
    pub model: String,
    /// Base URL override for OpenAI-compatible endpoints.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_top_p")]
    pub top_p: f32,
    #[serde(default = "d_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "d_max_context_tokens")]
    pub max_context_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: d_provider(),
            model: d_model(),
            endpoint: None,
            api_key: None,
            temperature: d_temperature(),
            top_p: d_top_p(),
            max_output_tokens: d_max_output_tokens(),
            max_context_tokens: d_max_context_tokens(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptConfig {
    /// System prompt prepended to every model request. Empty = none.
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub prompt_templates: PromptTemplates,
    #[serde(default)]
    pub output_style: OutputStyle,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptTemplates {
    #[serde(default)]
    pub interactive_preamble: String,
    #[serde(default)]
    pub autonomous_preamble: String,
    #[serde(default)]
    pub tool_use_preamble: String,
    #[serde(default)]
    pub checkpoint_preamble: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStyle {
    #[default]
    Concise,
    Verbose,
    Json,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool servers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Launch spec for a tool server subprocess (stdio transport).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Authorization and invocation rules for one tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRuleConfig {
    pub server_name: String,
    /// Regexes over tool names. Non-empty allowlist with no match = denied.
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// Regexes over tool names. Any match = denied; wins over allowlist.
    #[serde(default)]
    pub denylist: Vec<String>,
    #[serde(default)]
    pub requires_approval: ApprovalRule,
    #[serde(default)]
    pub redaction: RedactionRule,
    /// Per-call timeout in seconds.
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
    /// Immediate per-call retries on subprocess failure.
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "d_one")]
    pub concurrency_limit: usize,
}

impl Default for ToolRuleConfig {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            allowlist: Vec::new(),
            denylist: Vec::new(),
            requires_approval: ApprovalRule::default(),
            redaction: RedactionRule::default(),
            timeout_secs: d_timeout_secs(),
            retries: 0,
            concurrency_limit: d_one(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalRule {
    /// Every call to this server's tools needs user consent.
    #[serde(default)]
    pub always: bool,
    /// Regexes over tool names that trigger a consent checkpoint.
    #[serde(default)]
    pub conditional: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedactionRule {
    /// Argument names whose values are masked in events and logs. The
    /// subprocess still receives the original values.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Replace the tool's textual output with `[REDACTED]` before it enters
    /// the conversation.
    #[serde(default)]
    pub outputs: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval + budgets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub approval_mode: ApprovalMode,
    /// Skip consent checkpoints for autonomous-mode runs.
    #[serde(default)]
    pub auto_approve_in_daemon: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    Never,
    Always,
    #[default]
    Policy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Maximum tool-loop iterations per run.
    #[serde(default = "d_max_tool_calls")]
    pub max_tool_calls: u32,
    /// Wall-clock budget for a run. 0 = unlimited.
    #[serde(default = "d_max_run_time")]
    pub max_run_time_seconds: u64,
    /// Cost ceiling in USD. 0 = unlimited.
    #[serde(default)]
    pub max_cost: f64,
    #[serde(default = "d_max_failures")]
    pub max_failures_per_run: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: d_max_tool_calls(),
            max_run_time_seconds: d_max_run_time(),
            max_cost: 0.0,
            max_failures_per_run: d_max_failures(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_provider() -> String {
    "openai".into()
}
fn d_model() -> String {
    "gpt-4o".into()
}
fn d_temperature() -> f32 {
    0.2
}
fn d_top_p() -> f32 {
    1.0
}
fn d_max_output_tokens() -> u32 {
    4096
}
fn d_max_context_tokens() -> u32 {
    128_000
}
fn d_timeout_secs() -> u64 {
    60
}
fn d_one() -> usize {
    1
}
fn d_max_tool_calls() -> u32 {
    25
}
fn d_max_run_time() -> u64 {
    600
}
fn d_max_failures() -> u32 {
    3
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
