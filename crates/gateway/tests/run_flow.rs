//! End-to-end run scenarios: a scripted model client plus in-process tool
//! servers drive the full manager → executor → bus → store path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use arb_domain::config::{AgentConfig, ApprovalRule, RedactionRule, ToolRuleConfig};
use arb_domain::message::{Role, ToolCallRef};
use arb_model::{ChatResponse, ScriptedClient};
use arb_store::{Event, EventType, MemoryStore, Run, RunMode, RunStatus};
use arb_toolhost::protocol::{CallToolResult, ToolSpec};
use arb_toolhost::{InProcessTransport, ToolRegistry};

use arb_gateway::runtime::bus::{EventBus, SINK_CAPACITY};
use arb_gateway::runtime::manager::{NewRun, RunManager};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    store: Arc<MemoryStore>,
    client: Arc<ScriptedClient>,
    manager: Arc<RunManager>,
}

async fn harness(config: AgentConfig, servers: Vec<(&str, InProcessTransport)>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(ToolRegistry::new());
    for (name, transport) in servers {
        registry.attach(name, Box::new(transport)).await.unwrap();
    }
    let client = Arc::new(ScriptedClient::new());
    let manager = RunManager::new(store.clone(), bus, registry, client.clone(), config);
    Harness {
        store,
        client,
        manager,
    }
}

fn new_run(input: &str) -> NewRun {
    NewRun {
        tenant_id: "t1".into(),
        session_id: None,
        mode: RunMode::Interactive,
        input: input.into(),
        metadata: serde_json::Map::new(),
    }
}

fn call(id: &str, name: &str, arguments: &str) -> ToolCallRef {
    ToolCallRef {
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    }
}

fn spec(name: &str) -> ToolSpec {
    ToolSpec {
        name: name.into(),
        description: format!("{name} tool"),
        input_schema: json!({ "type": "object", "properties": {} }),
    }
}

fn text_result(text: &str) -> CallToolResult {
    CallToolResult {
        content: vec![arb_domain::tool::ContentBlock::text(text)],
        is_error: false,
    }
}

async fn wait_terminal(h: &Harness, run_id: &str) -> Run {
    wait_for(h, run_id, |run| run.status.is_terminal()).await
}

async fn wait_for(h: &Harness, run_id: &str, pred: impl Fn(&Run) -> bool) -> Run {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let run = h.manager.get_run(run_id).unwrap();
            if pred(&run) {
                return run;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("run did not reach the expected state in time")
}

async fn wait_for_event(h: &Harness, run_id: &str, event_type: EventType) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            if h.manager
                .get_events(run_id)
                .iter()
                .any(|e| e.event_type == event_type)
            {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("event did not appear in time");
}

fn event_types(h: &Harness, run_id: &str) -> Vec<EventType> {
    h.manager
        .get_events(run_id)
        .iter()
        .map(|e| e.event_type)
        .collect()
}

/// The stored sequence ends in exactly one terminal event with nothing
/// after it, and every tool_started has its completion/failure later on.
fn assert_event_invariants(h: &Harness, run_id: &str) {
    let events = h.manager.get_events(run_id);
    let terminal_positions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.event_type.is_terminal())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(terminal_positions.len(), 1, "exactly one terminal event");
    assert_eq!(
        terminal_positions[0],
        events.len() - 1,
        "no event follows the terminal event"
    );

    for (i, event) in events.iter().enumerate() {
        if event.event_type == EventType::ToolStarted {
            let id = event.data["tool_call_id"].as_str().unwrap();
            let paired = events[i + 1..].iter().any(|e| {
                matches!(e.event_type, EventType::ToolCompleted | EventType::ToolFailed)
                    && e.data["tool_call_id"].as_str() == Some(id)
            });
            assert!(paired, "tool_started {id} has no completion");
        }
        if event.event_type == EventType::ToolCompleted {
            let id = event.data["tool_call_id"].as_str().unwrap();
            let started = events[..i].iter().any(|e| {
                e.event_type == EventType::ToolStarted
                    && e.data["tool_call_id"].as_str() == Some(id)
            });
            assert!(started, "tool_completed {id} without prior tool_started");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 1 — happy path, no tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_path_without_tools() {
    let h = harness(AgentConfig::default(), vec![]).await;
    h.client.push(ChatResponse::text("pong"));

    let run = h.manager.create_run(new_run("ping")).unwrap();
    let done = wait_terminal(&h, &run.id).await;

    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.output, "pong");
    assert!(done.started_at.is_some());
    assert!(done.ended_at.is_some());

    let types = event_types(&h, &run.id);
    assert_eq!(
        types,
        vec![
            EventType::RunStarted,
            EventType::TextDelta,
            EventType::RunCompleted,
        ]
    );
    let events = h.manager.get_events(&run.id);
    assert_eq!(events[1].data["text"], "pong");
    assert_event_invariants(&h, &run.id);

    // The executor deregisters itself right after the terminal write.
    tokio::time::timeout(std::time::Duration::from_secs(1), async {
        while h.manager.is_active(&run.id) {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("run stayed in the active table");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 2 — single tool round-trip
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn single_tool_round_trip() {
    let echo = InProcessTransport::new().with_sync_tool(spec("echo"), |args| {
        let msg = args.get("message").and_then(|v| v.as_str()).unwrap_or("");
        text_result(msg)
    });
    let h = harness(AgentConfig::default(), vec![("s", echo)]).await;

    h.client.push(ChatResponse::with_tool_calls(
        "",
        vec![call("tc1", "echo", r#"{"message":"hi"}"#)],
    ));
    h.client.push(ChatResponse::text("done"));

    let run = h.manager.create_run(new_run("say hi")).unwrap();
    let done = wait_terminal(&h, &run.id).await;

    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.output, "done");
    assert_eq!(done.tool_call_count, 1);

    let types = event_types(&h, &run.id);
    assert_eq!(
        types,
        vec![
            EventType::RunStarted,
            EventType::ToolStarted,
            EventType::ToolCompleted,
            EventType::TextDelta,
            EventType::RunCompleted,
        ]
    );
    let events = h.manager.get_events(&run.id);
    assert_eq!(events[1].data["tool_call_id"], "tc1");
    assert_eq!(events[1].data["tool_name"], "echo");
    assert_eq!(events[2].data["output"], "hi");

    // user → assistant(tool_calls=[tc1]) → tool(tc1, "hi") → assistant("done")
    let messages = h.store.get_messages(&done.session_id);
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].tool_calls[0].id, "tc1");
    assert_eq!(messages[2].role, Role::Tool);
    assert_eq!(messages[2].answers_call(), Some("tc1"));
    assert_eq!(messages[2].content, "hi");
    assert_eq!(messages[3].role, Role::Assistant);
    assert_eq!(messages[3].content, "done");

    // The model saw the catalog.
    let requests = h.client.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].tools.iter().any(|t| t.name == "echo"));

    assert_event_invariants(&h, &run.id);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 3 — denylist blocks the tool before the server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn denylist_blocks_tool_without_contacting_server() {
    let contacted = Arc::new(AtomicUsize::new(0));
    let contacted_ref = contacted.clone();
    let server = InProcessTransport::new().with_sync_tool(spec("delete_all"), move |_| {
        contacted_ref.fetch_add(1, Ordering::SeqCst);
        text_result("gone")
    });

    let mut config = AgentConfig::default();
    config.tools = vec![ToolRuleConfig {
        server_name: "s".into(),
        denylist: vec![".*delete.*".into()],
        ..Default::default()
    }];
    let h = harness(config, vec![("s", server)]).await;

    h.client.push(ChatResponse::with_tool_calls(
        "",
        vec![call("tc1", "delete_all", "{}")],
    ));
    h.client.push(ChatResponse::text("understood"));

    let run = h.manager.create_run(new_run("wipe it")).unwrap();
    let done = wait_terminal(&h, &run.id).await;

    // The loop recovered: one failure, then a normal completion.
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.failure_count, 1);
    assert_eq!(contacted.load(Ordering::SeqCst), 0);

    let types = event_types(&h, &run.id);
    assert!(types.contains(&EventType::ToolFailed));
    assert!(!types.contains(&EventType::ToolCompleted));

    // The model got a tool-role error message it can react to.
    let messages = h.store.get_messages(&done.session_id);
    let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.content.starts_with("Error:"));
    assert!(tool_msg.content.contains("denied by pattern"));

    // The denied tool was hidden from the model's catalog too.
    assert!(h.client.requests()[0].tools.is_empty());

    assert_event_invariants(&h, &run.id);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 4 — consent required, denied
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn consent_denied_cancels_run() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let invoked_ref = invoked.clone();
    let server = InProcessTransport::new().with_sync_tool(spec("write_file"), move |_| {
        invoked_ref.fetch_add(1, Ordering::SeqCst);
        text_result("written")
    });

    let mut config = AgentConfig::default();
    config.tools = vec![ToolRuleConfig {
        server_name: "s".into(),
        requires_approval: ApprovalRule {
            always: true,
            conditional: vec![],
        },
        ..Default::default()
    }];
    let h = harness(config, vec![("s", server)]).await;

    h.client.push(ChatResponse::with_tool_calls(
        "",
        vec![call("tc1", "write_file", r#"{"path":"/tmp/x"}"#)],
    ));

    let run = h.manager.create_run(new_run("write the file")).unwrap();

    let paused = wait_for(&h, &run.id, |r| r.status == RunStatus::PausedCheckpoint).await;
    assert_eq!(paused.status, RunStatus::PausedCheckpoint);

    let types = event_types(&h, &run.id);
    assert!(types.contains(&EventType::CheckpointRequired));
    assert!(types.contains(&EventType::RunPaused));
    let checkpoint = h
        .manager
        .get_events(&run.id)
        .into_iter()
        .find(|e| e.event_type == EventType::CheckpointRequired)
        .unwrap();
    assert_eq!(checkpoint.data["tool_name"], "write_file");
    assert_eq!(checkpoint.data["reason"], "always requires user consent");
    assert_eq!(
        checkpoint.data["approval_schema"]["required"][0],
        "approved"
    );

    h.manager
        .approve_tool_call(&run.id, false, Some("no".into()))
        .unwrap();

    let done = wait_terminal(&h, &run.id).await;
    assert_eq!(done.status, RunStatus::Cancelled);
    assert!(done.error.unwrap().contains("denied by user"));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    let types = event_types(&h, &run.id);
    assert_eq!(*types.last().unwrap(), EventType::RunCancelled);
    assert_event_invariants(&h, &run.id);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Consent approved resumes the run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn consent_approved_runs_tool() {
    let server =
        InProcessTransport::new().with_sync_tool(spec("write_file"), |_| text_result("written"));

    let mut config = AgentConfig::default();
    config.tools = vec![ToolRuleConfig {
        server_name: "s".into(),
        requires_approval: ApprovalRule {
            always: true,
            conditional: vec![],
        },
        ..Default::default()
    }];
    let h = harness(config, vec![("s", server)]).await;

    h.client.push(ChatResponse::with_tool_calls(
        "",
        vec![call("tc1", "write_file", "{}")],
    ));
    h.client.push(ChatResponse::text("saved"));

    let run = h.manager.create_run(new_run("write it")).unwrap();
    wait_for(&h, &run.id, |r| r.status == RunStatus::PausedCheckpoint).await;

    h.manager.approve_tool_call(&run.id, true, None).unwrap();

    let done = wait_terminal(&h, &run.id).await;
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.output, "saved");

    let types = event_types(&h, &run.id);
    assert!(types.contains(&EventType::RunResumed));
    assert!(types.contains(&EventType::ToolCompleted));
    assert_event_invariants(&h, &run.id);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auto-approval in autonomous mode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn autonomous_mode_auto_approves() {
    let server =
        InProcessTransport::new().with_sync_tool(spec("write_file"), |_| text_result("written"));

    let mut config = AgentConfig::default();
    config.approval.auto_approve_in_daemon = true;
    config.tools = vec![ToolRuleConfig {
        server_name: "s".into(),
        requires_approval: ApprovalRule {
            always: true,
            conditional: vec![],
        },
        ..Default::default()
    }];
    let h = harness(config, vec![("s", server)]).await;

    h.client.push(ChatResponse::with_tool_calls(
        "",
        vec![call("tc1", "write_file", "{}")],
    ));
    h.client.push(ChatResponse::text("saved"));

    let mut req = new_run("write it");
    req.mode = RunMode::Autonomous;
    let run = h.manager.create_run(req).unwrap();
    let done = wait_terminal(&h, &run.id).await;

    assert_eq!(done.status, RunStatus::Completed);
    let types = event_types(&h, &run.id);
    assert!(!types.contains(&EventType::CheckpointRequired));
    assert!(types.contains(&EventType::ToolCompleted));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 5 — cancellation during a tool call
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn cancellation_interrupts_running_tool() {
    let server = InProcessTransport::new().with_tool(spec("sleepy"), |_| {
        Box::pin(async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            text_result("too late")
        })
    });
    let h = harness(AgentConfig::default(), vec![("s", server)]).await;

    h.client.push(ChatResponse::with_tool_calls(
        "",
        vec![call("tc1", "sleepy", "{}")],
    ));

    let run = h.manager.create_run(new_run("nap")).unwrap();
    wait_for_event(&h, &run.id, EventType::ToolStarted).await;

    h.manager.cancel_run(&run.id).unwrap();
    let done = wait_terminal(&h, &run.id).await;

    assert_eq!(done.status, RunStatus::Cancelled);
    let events = h.manager.get_events(&run.id);
    let failed = events
        .iter()
        .find(|e| e.event_type == EventType::ToolFailed)
        .unwrap();
    assert!(failed.data["error"].as_str().unwrap().contains("cancelled"));
    assert_eq!(*event_types(&h, &run.id).last().unwrap(), EventType::RunCancelled);
    assert_event_invariants(&h, &run.id);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenario 6 — slow subscriber never stalls the producer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn slow_subscriber_loses_events_but_not_the_producer() {
    let bus = EventBus::new();
    let mut slow = bus.subscribe("r1");
    let mut fast = bus.subscribe("r1");

    let total = 200;
    let reader = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(event) = fast.rx.recv().await {
            seen.push(event);
        }
        seen
    });

    for n in 0..total {
        let event_type = if n == total - 1 {
            EventType::RunCompleted
        } else {
            EventType::TextDelta
        };
        bus.publish("r1", &Event::new("r1", event_type, json!({ "seq": n })));
        // Give the fast reader a chance to drain.
        tokio::task::yield_now().await;
    }
    bus.close_all("r1");

    // The fast subscriber saw everything in order, terminal included.
    let seen = reader.await.unwrap();
    assert_eq!(seen.len(), total);
    for (n, event) in seen.iter().enumerate() {
        assert_eq!(event.data["seq"], n);
    }
    assert_eq!(seen.last().unwrap().event_type, EventType::RunCompleted);

    // The slow subscriber kept an in-order prefix of at most the sink
    // capacity; everything after was dropped for it alone.
    let mut prefix = 0;
    while let Some(event) = slow.rx.recv().await {
        assert_eq!(event.data["seq"], prefix);
        prefix += 1;
    }
    assert_eq!(prefix, SINK_CAPACITY);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pause / resume and the config snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn paused_run_keeps_its_config_snapshot() {
    let server = InProcessTransport::new().with_tool(spec("slow_echo"), |_| {
        Box::pin(async {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            text_result("echoed")
        })
    });

    let mut config = AgentConfig::default();
    config.prompting.system_prompt = "original prompt".into();
    config.model.temperature = 0.7;
    let h = harness(config, vec![("s", server)]).await;

    h.client.push(ChatResponse::with_tool_calls(
        "",
        vec![call("tc1", "slow_echo", "{}")],
    ));
    h.client.push(ChatResponse::text("done"));

    let run = h.manager.create_run(new_run("go")).unwrap();
    wait_for_event(&h, &run.id, EventType::ToolStarted).await;

    // Pause, hot-swap the configuration, resume.
    h.manager.pause_run(&run.id).unwrap();
    let mut swapped = AgentConfig::default();
    swapped.prompting.system_prompt = "swapped prompt".into();
    swapped.model.temperature = 0.0;
    h.manager.set_config(swapped);
    h.manager.resume_run(&run.id).unwrap();

    let done = wait_terminal(&h, &run.id).await;
    assert_eq!(done.status, RunStatus::Completed);

    let types = event_types(&h, &run.id);
    assert!(types.contains(&EventType::RunPaused));
    assert!(types.contains(&EventType::RunResumed));

    // The second model call still used the original snapshot.
    let requests = h.client.requests();
    assert_eq!(requests.len(), 2);
    let second = &requests[1];
    assert_eq!(second.temperature, Some(0.7));
    assert_eq!(second.messages[0].role, Role::System);
    assert!(second.messages[0].content.contains("original prompt"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Budgets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn iteration_cap_fails_the_run() {
    let server = InProcessTransport::new().with_sync_tool(spec("echo"), |_| text_result("ok"));

    let mut config = AgentConfig::default();
    config.budgets.max_tool_calls = 2;
    let h = harness(config, vec![("s", server)]).await;

    for n in 0..3 {
        h.client.push(ChatResponse::with_tool_calls(
            "",
            vec![call(&format!("tc{n}"), "echo", "{}")],
        ));
    }

    let run = h.manager.create_run(new_run("loop forever")).unwrap();
    let done = wait_terminal(&h, &run.id).await;

    assert_eq!(done.status, RunStatus::Failed);
    assert!(done.error.unwrap().contains("max iterations exceeded"));
    assert_eq!(h.client.calls(), 2);
}

#[tokio::test]
async fn failure_budget_fails_the_run() {
    let h = harness(AgentConfig::default(), vec![]).await;
    for _ in 0..3 {
        h.client.push_error(arb_domain::Error::Model {
            provider: "scripted".into(),
            message: "overloaded".into(),
        });
    }

    let run = h.manager.create_run(new_run("hello")).unwrap();
    let done = wait_terminal(&h, &run.id).await;

    assert_eq!(done.status, RunStatus::Failed);
    assert_eq!(done.failure_count, 3);
    assert!(done.error.unwrap().contains("failure budget exceeded"));
    assert_eq!(*event_types(&h, &run.id).last().unwrap(), EventType::RunFailed);
}

#[tokio::test]
async fn model_errors_below_budget_recover() {
    let h = harness(AgentConfig::default(), vec![]).await;
    h.client.push_error(arb_domain::Error::Timeout("model call".into()));
    h.client.push(ChatResponse::text("recovered"));

    let run = h.manager.create_run(new_run("hello")).unwrap();
    let done = wait_terminal(&h, &run.id).await;

    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.output, "recovered");
    assert_eq!(done.failure_count, 1);
}

#[tokio::test]
async fn run_time_budget_fails_the_run() {
    let server = InProcessTransport::new().with_tool(spec("sleepy"), |_| {
        Box::pin(async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            text_result("too late")
        })
    });

    let mut config = AgentConfig::default();
    config.budgets.max_run_time_seconds = 1;
    let h = harness(config, vec![("s", server)]).await;

    h.client.push(ChatResponse::with_tool_calls(
        "",
        vec![call("tc1", "sleepy", "{}")],
    ));

    let run = h.manager.create_run(new_run("nap")).unwrap();
    let done = wait_terminal(&h, &run.id).await;

    assert_eq!(done.status, RunStatus::Failed);
    assert!(done.error.unwrap().contains("time budget"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Redaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn output_and_argument_redaction() {
    let server = InProcessTransport::new().with_sync_tool(spec("fetch_secret"), |args| {
        // The server must still see the real token.
        assert_eq!(args["token"], "s3cr3t");
        text_result("the secret value")
    });

    let mut config = AgentConfig::default();
    config.tools = vec![ToolRuleConfig {
        server_name: "s".into(),
        redaction: RedactionRule {
            arguments: vec!["token".into()],
            outputs: true,
        },
        ..Default::default()
    }];
    let h = harness(config, vec![("s", server)]).await;

    h.client.push(ChatResponse::with_tool_calls(
        "",
        vec![call("tc1", "fetch_secret", r#"{"token":"s3cr3t"}"#)],
    ));
    h.client.push(ChatResponse::text("done"));

    let run = h.manager.create_run(new_run("fetch it")).unwrap();
    let done = wait_terminal(&h, &run.id).await;
    assert_eq!(done.status, RunStatus::Completed);

    let events = h.manager.get_events(&run.id);
    let started = events
        .iter()
        .find(|e| e.event_type == EventType::ToolStarted)
        .unwrap();
    assert_eq!(started.data["arguments"]["token"], "[REDACTED]");

    let completed = events
        .iter()
        .find(|e| e.event_type == EventType::ToolCompleted)
        .unwrap();
    assert_eq!(completed.data["output"], "[REDACTED]");

    // The tool message the model sees is redacted too.
    let messages = h.store.get_messages(&done.session_id);
    let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(tool_msg.content, "[REDACTED]");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions are shared across runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn second_run_sees_prior_conversation() {
    let h = harness(AgentConfig::default(), vec![]).await;
    h.client.push(ChatResponse::text("four"));
    h.client.push(ChatResponse::text("yes, four"));

    let first = h.manager.create_run(new_run("what is 2+2?")).unwrap();
    let first = wait_terminal(&h, &first.id).await;
    assert_eq!(first.output, "four");

    let mut req = new_run("are you sure?");
    req.session_id = Some(first.session_id.clone());
    let second = h.manager.create_run(req).unwrap();
    let second = wait_terminal(&h, &second.id).await;
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.session_id, first.session_id);

    // The second model call carried the whole history.
    let requests = h.client.requests();
    let contents: Vec<&str> = requests[1]
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(contents, vec!["what is 2+2?", "four", "are you sure?"]);

    assert_eq!(h.store.list_runs(&first.session_id).len(), 2);
}
