//! The run executor — drives one run's model ↔ tool reasoning loop.
//!
//! States: queued → running → (paused | paused_checkpoint)* →
//! completed | failed | cancelled. Terminal states are absorbing: the
//! executor stamps `ended_at`, emits the terminal event, closes the run's
//! event sinks, and returns.
//!
//! Every event is persisted to the store before it is published to the
//! bus, so the stored sequence is the complete record and the bus is the
//! lossy live view.

use std::sync::Arc;

use serde_json::{json, Value};

use arb_domain::config::{AgentConfig, ApprovalMode, ToolRuleConfig};
use arb_domain::message::{Message, ToolCallRef};
use arb_domain::stream::FinishReason;
use arb_model::{ChatRequest, ModelClient};
use arb_store::{
    Event, EventType, MemoryStore, RunMode, RunStatus, ToolCallRecord, ToolCallStatus,
};
use arb_toolhost::{authz, ToolRegistry};

use super::bus::EventBus;
use super::handle::{ApprovalDecision, RunHandle};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dependencies and loop state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the executor needs from the outside world.
#[derive(Clone)]
pub struct ExecDeps {
    pub store: Arc<MemoryStore>,
    pub bus: Arc<EventBus>,
    pub registry: Arc<ToolRegistry>,
    pub model: Arc<dyn ModelClient>,
}

/// Ephemeral per-run state, built at executor start and discarded on
/// finish. `config` is a snapshot: later configuration changes are never
/// observed by an in-flight run.
struct RunContext {
    run_id: String,
    session_id: String,
    mode: RunMode,
    config: AgentConfig,
    /// Working conversation history, kept in sync with the store.
    messages: Vec<Message>,
    tool_call_count: u32,
    failure_count: u32,
    deadline: Option<tokio::time::Instant>,
}

/// How the loop ended.
enum LoopEnd {
    Completed { output: String },
    Cancelled { reason: String },
    Failed { error: String },
}

enum CheckpointOutcome {
    Approved,
    End(LoopEnd),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run the loop to a terminal state, then persist the transition, emit the
/// terminal event, and close the run's event sinks.
pub async fn execute(deps: ExecDeps, run_id: String, handle: Arc<RunHandle>, config: AgentConfig) {
    let end = run_loop(&deps, &run_id, &handle, config).await;
    finish(&deps, &run_id, end);
}

fn finish(deps: &ExecDeps, run_id: &str, end: LoopEnd) {
    let (status, event_type, data, error) = match end {
        LoopEnd::Completed { output } => (
            RunStatus::Completed,
            EventType::RunCompleted,
            json!({ "output": output }),
            None,
        ),
        LoopEnd::Cancelled { reason } => (
            RunStatus::Cancelled,
            EventType::RunCancelled,
            json!({ "reason": reason }),
            Some(reason.clone()),
        ),
        LoopEnd::Failed { error } => (
            RunStatus::Failed,
            EventType::RunFailed,
            json!({ "error": error }),
            Some(error.clone()),
        ),
    };

    if let Err(e) = deps.store.update_run(run_id, |r| {
        r.finish(status);
        if error.is_some() {
            r.error = error.clone();
        }
    }) {
        tracing::warn!(run_id, error = %e, "failed to persist terminal run state");
    }
    emit(deps, run_id, event_type, data);
    deps.bus.close_all(run_id);
    tracing::info!(run_id, status = ?status, "run finished");
}

/// Persist an event, then publish it to live subscribers.
fn emit(deps: &ExecDeps, run_id: &str, event_type: EventType, data: Value) {
    let event = Event::new(run_id, event_type, data);
    if let Err(e) = deps.store.add_event(event.clone()) {
        tracing::warn!(run_id, event_type = %event_type, error = %e, "failed to persist run event");
    }
    deps.bus.publish(run_id, &event);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_loop(
    deps: &ExecDeps,
    run_id: &str,
    handle: &Arc<RunHandle>,
    config: AgentConfig,
) -> LoopEnd {
    let run = match deps.store.get_run(run_id) {
        Ok(r) => r,
        Err(e) => {
            return LoopEnd::Failed {
                error: format!("loading run: {e}"),
            }
        }
    };

    let deadline = (config.budgets.max_run_time_seconds > 0).then(|| {
        tokio::time::Instant::now()
            + std::time::Duration::from_secs(config.budgets.max_run_time_seconds)
    });
    let max_iterations = config.budgets.max_tool_calls.max(1);

    let mut ctx = RunContext {
        run_id: run_id.to_string(),
        session_id: run.session_id.clone(),
        mode: run.mode,
        messages: deps.store.get_messages(&run.session_id),
        config,
        tool_call_count: 0,
        failure_count: 0,
        deadline,
    };

    if let Err(e) = deps.store.update_run(run_id, |r| {
        r.status = RunStatus::Running;
        r.started_at = Some(chrono::Utc::now());
    }) {
        return LoopEnd::Failed {
            error: format!("starting run: {e}"),
        };
    }
    emit(deps, run_id, EventType::RunStarted, json!({ "mode": ctx.mode }));

    let mut output = String::new();

    for iteration in 0..max_iterations {
        tracing::debug!(run_id, iteration, "loop iteration");

        if handle.cancel.is_cancelled() {
            return LoopEnd::Cancelled {
                reason: "run cancelled".into(),
            };
        }
        if deadline_passed(&ctx) {
            return LoopEnd::Failed {
                error: "run time budget exceeded".into(),
            };
        }
        if handle.pause_pending().await {
            if let Some(end) = wait_while_paused(deps, &ctx, handle).await {
                return end;
            }
        }

        // Messages come from the working history; tools from the filtered
        // catalog — both through the run's config snapshot.
        let tools = deps.registry.list_tools_filtered(&ctx.config.tools).await;
        let req = build_chat_request(&ctx, tools);

        let result = tokio::select! {
            r = deps.model.chat(req) => r,
            _ = handle.cancel.cancelled() => {
                return LoopEnd::Cancelled { reason: "run cancelled during model call".into() };
            }
            _ = deadline_sleep(ctx.deadline) => {
                return LoopEnd::Failed { error: "run time budget exceeded".into() };
            }
        };

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => match bump_failure(deps, &mut ctx, &format!("model call failed: {e}")) {
                Some(end) => return end,
                None => continue,
            },
        };

        if !resp.content.is_empty() {
            emit(deps, run_id, EventType::TextDelta, json!({ "text": resp.content }));
            output = resp.content.clone();
            let content = resp.content.clone();
            if let Err(e) = deps.store.update_run(run_id, |r| r.output = content) {
                return LoopEnd::Failed {
                    error: format!("persisting output: {e}"),
                };
            }
        }

        if !resp.content.is_empty() || !resp.tool_calls.is_empty() {
            let msg = Message::assistant_with_calls(
                &ctx.session_id,
                &resp.content,
                resp.tool_calls.clone(),
            );
            if let Err(e) = deps.store.add_message(msg.clone()) {
                return LoopEnd::Failed {
                    error: format!("persisting assistant message: {e}"),
                };
            }
            ctx.messages.push(msg);
        }

        if !resp.tool_calls.is_empty() {
            // Sequential execution in the model's call order; the tool
            // result messages keep the turn coherent.
            for call in &resp.tool_calls {
                if let Some(end) = handle_tool_call(deps, &mut ctx, handle, call).await {
                    return end;
                }
            }
            continue;
        }

        if resp.finish_reason.is_done() {
            return LoopEnd::Completed { output };
        }
        if resp.finish_reason == FinishReason::Error {
            match bump_failure(deps, &mut ctx, "model reported an error finish") {
                Some(end) => return end,
                None => continue,
            }
        }
        // Length and other non-terminal finishes: let the model continue.
    }

    LoopEnd::Failed {
        error: "max iterations exceeded".into(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pause / checkpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn wait_while_paused(
    deps: &ExecDeps,
    ctx: &RunContext,
    handle: &Arc<RunHandle>,
) -> Option<LoopEnd> {
    if let Err(e) = deps
        .store
        .update_run(&ctx.run_id, |r| r.status = RunStatus::Paused)
    {
        return Some(LoopEnd::Failed {
            error: format!("persisting pause: {e}"),
        });
    }
    handle.set_paused(true);
    emit(
        deps,
        &ctx.run_id,
        EventType::RunPaused,
        json!({ "reason": "pause requested" }),
    );

    let end = tokio::select! {
        _ = handle.recv_resume() => None,
        _ = handle.cancel.cancelled() => Some(LoopEnd::Cancelled {
            reason: "run cancelled while paused".into(),
        }),
        _ = deadline_sleep(ctx.deadline) => Some(LoopEnd::Failed {
            error: "run time budget exceeded".into(),
        }),
    };
    handle.set_paused(false);

    if end.is_none() {
        if let Err(e) = deps
            .store
            .update_run(&ctx.run_id, |r| r.status = RunStatus::Running)
        {
            return Some(LoopEnd::Failed {
                error: format!("persisting resume: {e}"),
            });
        }
        emit(deps, &ctx.run_id, EventType::RunResumed, json!({}));
    }
    end
}

async fn checkpoint(
    deps: &ExecDeps,
    ctx: &RunContext,
    handle: &Arc<RunHandle>,
    call: &ToolCallRef,
    shown_args: &Value,
    reason: &str,
) -> CheckpointOutcome {
    if let Err(e) = deps
        .store
        .update_run(&ctx.run_id, |r| r.status = RunStatus::PausedCheckpoint)
    {
        return CheckpointOutcome::End(LoopEnd::Failed {
            error: format!("persisting checkpoint: {e}"),
        });
    }
    handle.set_paused(true);
    let rx = handle.begin_checkpoint();

    let mut data = json!({
        "tool_call_id": call.id,
        "tool_name": call.name,
        "arguments": shown_args,
        "reason": reason,
        "approval_schema": {
            "type": "object",
            "properties": {
                "approved": { "type": "boolean" },
                "reason": { "type": "string" }
            },
            "required": ["approved"]
        }
    });
    let guidance = &ctx.config.prompting.prompt_templates.checkpoint_preamble;
    if !guidance.is_empty() {
        data["guidance"] = json!(guidance);
    }
    emit(deps, &ctx.run_id, EventType::CheckpointRequired, data);
    emit(
        deps,
        &ctx.run_id,
        EventType::RunPaused,
        json!({ "reason": format!("awaiting approval for tool '{}'", call.name) }),
    );

    let decision = tokio::select! {
        d = rx => d,
        _ = handle.cancel.cancelled() => {
            handle.clear_checkpoint();
            handle.set_paused(false);
            fail_tool_record(deps, ctx, call, ToolCallStatus::Cancelled, "run cancelled");
            emit(deps, &ctx.run_id, EventType::ToolFailed, json!({
                "tool_call_id": call.id,
                "tool_name": call.name,
                "error": "run cancelled at checkpoint",
            }));
            return CheckpointOutcome::End(LoopEnd::Cancelled {
                reason: "run cancelled at checkpoint".into(),
            });
        }
        _ = deadline_sleep(ctx.deadline) => {
            handle.clear_checkpoint();
            handle.set_paused(false);
            fail_tool_record(deps, ctx, call, ToolCallStatus::Cancelled, "run time budget exceeded");
            emit(deps, &ctx.run_id, EventType::ToolFailed, json!({
                "tool_call_id": call.id,
                "tool_name": call.name,
                "error": "run time budget exceeded at checkpoint",
            }));
            return CheckpointOutcome::End(LoopEnd::Failed {
                error: "run time budget exceeded".into(),
            });
        }
    };
    handle.set_paused(false);

    match decision {
        Ok(ApprovalDecision::Approved) => {
            if let Err(e) = deps
                .store
                .update_run(&ctx.run_id, |r| r.status = RunStatus::Running)
            {
                return CheckpointOutcome::End(LoopEnd::Failed {
                    error: format!("persisting approval: {e}"),
                });
            }
            emit(
                deps,
                &ctx.run_id,
                EventType::RunResumed,
                json!({ "tool_call_id": call.id }),
            );
            CheckpointOutcome::Approved
        }
        Ok(ApprovalDecision::Denied { reason }) => {
            let why = reason.unwrap_or_else(|| "no reason given".into());
            fail_tool_record(deps, ctx, call, ToolCallStatus::Cancelled, &why);
            emit(deps, &ctx.run_id, EventType::ToolFailed, json!({
                "tool_call_id": call.id,
                "tool_name": call.name,
                "error": format!("denied by user: {why}"),
            }));
            CheckpointOutcome::End(LoopEnd::Cancelled {
                reason: format!("tool call '{}' denied by user: {why}", call.name),
            })
        }
        Err(_) => CheckpointOutcome::End(LoopEnd::Cancelled {
            reason: "approval channel closed".into(),
        }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_tool_call(
    deps: &ExecDeps,
    ctx: &mut RunContext,
    handle: &Arc<RunHandle>,
    call: &ToolCallRef,
) -> Option<LoopEnd> {
    let args = call.arguments_value();

    let server_name = deps
        .registry
        .get_tool(&call.name)
        .await
        .ok()
        .map(|(server, _)| server);
    let rule = server_name
        .as_deref()
        .and_then(|s| ctx.config.rule_for(s))
        .cloned();

    let record = ToolCallRecord::new(
        &call.id,
        &ctx.run_id,
        &call.name,
        server_name.unwrap_or_default(),
        args.clone(),
    );
    if let Err(e) = deps.store.add_tool_call(record) {
        return Some(LoopEnd::Failed {
            error: format!("persisting tool call: {e}"),
        });
    }

    // Event payloads carry redacted arguments; the subprocess gets the
    // originals.
    let shown_args = match &rule {
        Some(r) => authz::redact_arguments(&args, &r.redaction.arguments),
        None => args.clone(),
    };
    emit(deps, &ctx.run_id, EventType::ToolStarted, json!({
        "tool_call_id": call.id,
        "tool_name": call.name,
        "arguments": shown_args,
    }));

    if let Some(reason) = consent_reason(ctx, &call.name, &args, rule.as_ref()) {
        let auto_approved =
            ctx.mode == RunMode::Autonomous && ctx.config.approval.auto_approve_in_daemon;
        if auto_approved {
            tracing::debug!(run_id = %ctx.run_id, tool = %call.name, "auto-approving in daemon mode");
        } else {
            match checkpoint(deps, ctx, handle, call, &shown_args, &reason).await {
                CheckpointOutcome::Approved => {}
                CheckpointOutcome::End(end) => return Some(end),
            }
        }
    }

    let _ = deps.store.update_tool_call(&ctx.run_id, &call.id, |r| {
        r.status = ToolCallStatus::Running;
        r.started_at = Some(chrono::Utc::now());
    });

    let result = tokio::select! {
        r = deps.registry.call_tool(&call.name, args.clone(), rule.as_ref()) => r,
        _ = handle.cancel.cancelled() => {
            fail_tool_record(deps, ctx, call, ToolCallStatus::Cancelled, "run cancelled");
            emit(deps, &ctx.run_id, EventType::ToolFailed, json!({
                "tool_call_id": call.id,
                "tool_name": call.name,
                "error": "run cancelled during tool call",
            }));
            return Some(LoopEnd::Cancelled {
                reason: format!("run cancelled during tool call '{}'", call.name),
            });
        }
        _ = deadline_sleep(ctx.deadline) => {
            fail_tool_record(deps, ctx, call, ToolCallStatus::Cancelled, "run time budget exceeded");
            emit(deps, &ctx.run_id, EventType::ToolFailed, json!({
                "tool_call_id": call.id,
                "tool_name": call.name,
                "error": "run time budget exceeded during tool call",
            }));
            return Some(LoopEnd::Failed {
                error: "run time budget exceeded".into(),
            });
        }
    };

    match result {
        Ok(outcome) if !outcome.is_error => {
            let mut text = outcome.text();
            if rule.as_ref().map(|r| r.redaction.outputs).unwrap_or(false) {
                text = authz::REDACTED.to_string();
            }

            let msg = Message::tool_result(&ctx.session_id, call, &text);
            if let Err(e) = deps.store.add_message(msg.clone()) {
                return Some(LoopEnd::Failed {
                    error: format!("persisting tool result: {e}"),
                });
            }
            ctx.messages.push(msg);

            let output = text.clone();
            let _ = deps.store.update_tool_call(&ctx.run_id, &call.id, |r| {
                r.status = ToolCallStatus::Completed;
                r.output = output;
                r.completed_at = Some(chrono::Utc::now());
            });

            ctx.tool_call_count += 1;
            let count = ctx.tool_call_count;
            let _ = deps.store.update_run(&ctx.run_id, |r| r.tool_call_count = count);

            emit(deps, &ctx.run_id, EventType::ToolCompleted, json!({
                "tool_call_id": call.id,
                "tool_name": call.name,
                "output": text,
            }));
            None
        }
        Ok(outcome) => {
            // The server produced blocks but flagged the call as failed;
            // surface them so the model can react.
            let text = outcome.text();
            let error_text = if text.is_empty() {
                "Error: tool reported failure".to_string()
            } else {
                format!("Error: {text}")
            };
            fail_tool(deps, ctx, call, &error_text).await
        }
        Err(e) => fail_tool(deps, ctx, call, &format!("Error: {e}")).await,
    }
}

/// Tool failure path: mark the record, emit `tool_failed`, append an error
/// tool message so the model can adapt, and count against the failure
/// budget.
async fn fail_tool(
    deps: &ExecDeps,
    ctx: &mut RunContext,
    call: &ToolCallRef,
    error_text: &str,
) -> Option<LoopEnd> {
    fail_tool_record(deps, ctx, call, ToolCallStatus::Failed, error_text);
    emit(deps, &ctx.run_id, EventType::ToolFailed, json!({
        "tool_call_id": call.id,
        "tool_name": call.name,
        "error": error_text,
    }));

    let msg = Message::tool_result(&ctx.session_id, call, error_text);
    if let Err(e) = deps.store.add_message(msg.clone()) {
        return Some(LoopEnd::Failed {
            error: format!("persisting tool error message: {e}"),
        });
    }
    ctx.messages.push(msg);

    bump_failure(deps, ctx, error_text)
}

fn fail_tool_record(
    deps: &ExecDeps,
    ctx: &RunContext,
    call: &ToolCallRef,
    status: ToolCallStatus,
    error: &str,
) {
    let error = error.to_string();
    let _ = deps.store.update_tool_call(&ctx.run_id, &call.id, |r| {
        r.status = status;
        r.error = Some(error);
        r.completed_at = Some(chrono::Utc::now());
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Count a recoverable failure; returns the terminal end once the budget
/// is exhausted.
fn bump_failure(deps: &ExecDeps, ctx: &mut RunContext, error: &str) -> Option<LoopEnd> {
    ctx.failure_count += 1;
    let count = ctx.failure_count;
    tracing::warn!(run_id = %ctx.run_id, failure_count = count, error, "recoverable failure");
    if deps
        .store
        .update_run(&ctx.run_id, |r| r.failure_count = count)
        .is_err()
    {
        return Some(LoopEnd::Failed {
            error: "persisting failure count".into(),
        });
    }
    if count >= ctx.config.budgets.max_failures_per_run.max(1) {
        return Some(LoopEnd::Failed {
            error: format!("failure budget exceeded: {error}"),
        });
    }
    None
}

fn deadline_passed(ctx: &RunContext) -> bool {
    ctx.deadline
        .map(|d| tokio::time::Instant::now() >= d)
        .unwrap_or(false)
}

/// Sleeps until the run deadline; pends forever when there is none.
async fn deadline_sleep(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

fn consent_reason(
    ctx: &RunContext,
    tool_name: &str,
    args: &Value,
    rule: Option<&ToolRuleConfig>,
) -> Option<String> {
    match ctx.config.approval.approval_mode {
        ApprovalMode::Never => None,
        ApprovalMode::Always => Some("approval mode is 'always'".into()),
        ApprovalMode::Policy => rule.and_then(|r| match authz::authorize(tool_name, args, r) {
            authz::Authorization::NeedsConsent { reason } => Some(reason),
            _ => None,
        }),
    }
}

fn build_chat_request(ctx: &RunContext, tools: Vec<arb_domain::tool::ToolDefinition>) -> ChatRequest {
    let mut messages = Vec::new();
    let system = system_prompt(&ctx.config, ctx.mode, !tools.is_empty());
    if !system.is_empty() {
        messages.push(Message::system(&ctx.session_id, system));
    }
    messages.extend(ctx.messages.iter().cloned());

    ChatRequest {
        messages,
        tools,
        temperature: Some(ctx.config.model.temperature),
        top_p: Some(ctx.config.model.top_p),
        max_tokens: Some(ctx.config.model.max_output_tokens),
        model: Some(ctx.config.model.model.clone()),
    }
}

/// Assemble the system prompt: base prompt, mode preamble, tool preamble
/// when a catalog is present, and the output-style instruction.
fn system_prompt(config: &AgentConfig, mode: RunMode, has_tools: bool) -> String {
    use arb_domain::config::OutputStyle;

    let mut parts: Vec<&str> = Vec::new();
    if !config.prompting.system_prompt.is_empty() {
        parts.push(&config.prompting.system_prompt);
    }
    let preamble = match mode {
        RunMode::Interactive => &config.prompting.prompt_templates.interactive_preamble,
        RunMode::Autonomous => &config.prompting.prompt_templates.autonomous_preamble,
    };
    if !preamble.is_empty() {
        parts.push(preamble);
    }
    if has_tools && !config.prompting.prompt_templates.tool_use_preamble.is_empty() {
        parts.push(&config.prompting.prompt_templates.tool_use_preamble);
    }
    let style = match config.prompting.output_style {
        OutputStyle::Concise => "",
        OutputStyle::Verbose => "Prefer thorough, detailed answers.",
        OutputStyle::Json => "Respond with valid JSON only.",
    };
    if !style.is_empty() {
        parts.push(style);
    }
    parts.join("\n\n")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
