//! The run manager — top-level orchestrator.
//!
//! Creates runs (resolving or creating their session), owns the active-run
//! table, and routes control commands (cancel/pause/resume/approve) to the
//! right [`RunHandle`]. Executors run on their own tasks and deregister
//! themselves when they finish.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::Instrument;

use arb_domain::config::AgentConfig;
use arb_domain::message::Message;
use arb_domain::{Error, Result};
use arb_model::ModelClient;
use arb_store::{Event, MemoryStore, Run, RunMode, Session};
use arb_toolhost::ToolRegistry;

use super::bus::{EventBus, Subscription};
use super::executor::{self, ExecDeps};
use super::handle::RunHandle;

/// Request to start a new run.
pub struct NewRun {
    pub tenant_id: String,
    /// Reuse an existing session; a fresh one is created when absent.
    pub session_id: Option<String>,
    pub mode: RunMode,
    pub input: String,
    /// Seeds the metadata of a newly created session.
    pub metadata: Map<String, Value>,
}

pub struct RunManager {
    store: Arc<MemoryStore>,
    bus: Arc<EventBus>,
    registry: Arc<ToolRegistry>,
    model: Arc<dyn ModelClient>,
    /// Current configuration. Each run snapshots it at creation; swapping
    /// it never affects in-flight runs.
    config: RwLock<AgentConfig>,
    active: Arc<RwLock<HashMap<String, Arc<RunHandle>>>>,
}

impl RunManager {
    pub fn new(
        store: Arc<MemoryStore>,
        bus: Arc<EventBus>,
        registry: Arc<ToolRegistry>,
        model: Arc<dyn ModelClient>,
        config: AgentConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            registry,
            model,
            config: RwLock::new(config),
            active: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// The current configuration (cloned).
    pub fn config(&self) -> AgentConfig {
        self.config.read().clone()
    }

    /// Replace the configuration for future runs.
    pub fn set_config(&self, config: AgentConfig) {
        *self.config.write() = config;
    }

    // ── Run lifecycle ─────────────────────────────────────────────

    /// Create a run: resolve or create the session, append the user
    /// message, insert the run in `queued`, and spawn its executor.
    pub fn create_run(&self, req: NewRun) -> Result<Run> {
        if req.tenant_id.trim().is_empty() {
            return Err(Error::Invalid("tenant_id must not be empty".into()));
        }
        if req.input.trim().is_empty() {
            return Err(Error::Invalid("input must not be empty".into()));
        }

        let session = match &req.session_id {
            Some(id) => {
                let session = self.store.get_session(id)?;
                if session.tenant_id != req.tenant_id {
                    return Err(Error::Invalid(format!(
                        "session {id} belongs to a different tenant"
                    )));
                }
                session
            }
            None => {
                let mut session = Session::new(&req.tenant_id, "default");
                session.metadata = req.metadata.clone();
                self.store.create_session(session)
            }
        };

        self.store
            .add_message(Message::user(&session.id, &req.input))?;

        let run = self
            .store
            .create_run(Run::new(&session.id, &req.tenant_id, req.mode, &req.input))?;

        let handle = RunHandle::new();
        self.active.write().insert(run.id.clone(), handle.clone());

        let deps = ExecDeps {
            store: self.store.clone(),
            bus: self.bus.clone(),
            registry: self.registry.clone(),
            model: self.model.clone(),
        };
        let config = self.config();
        let active = self.active.clone();
        let run_id = run.id.clone();
        let span = tracing::info_span!("run", run_id = %run.id, tenant = %run.tenant_id);

        tokio::spawn(
            async move {
                executor::execute(deps, run_id.clone(), handle, config).await;
                active.write().remove(&run_id);
            }
            .instrument(span),
        );

        Ok(run)
    }

    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        self.store.get_run(run_id)
    }

    /// Historical events from the store, in publication order.
    pub fn get_events(&self, run_id: &str) -> Vec<Event> {
        self.store.get_events(run_id)
    }

    // ── Control commands ──────────────────────────────────────────

    fn handle_for(&self, run_id: &str) -> Result<Arc<RunHandle>> {
        self.active
            .read()
            .get(run_id)
            .cloned()
            .ok_or_else(|| Error::NotActive(run_id.to_string()))
    }

    pub fn cancel_run(&self, run_id: &str) -> Result<()> {
        let handle = self.handle_for(run_id)?;
        tracing::info!(run_id, "cancel requested");
        handle.cancel.cancel();
        Ok(())
    }

    pub fn pause_run(&self, run_id: &str) -> Result<()> {
        let handle = self.handle_for(run_id)?;
        tracing::info!(run_id, "pause requested");
        handle.request_pause();
        Ok(())
    }

    pub fn resume_run(&self, run_id: &str) -> Result<()> {
        let handle = self.handle_for(run_id)?;
        tracing::info!(run_id, "resume requested");
        handle.request_resume();
        Ok(())
    }

    /// Resolve a pending consent checkpoint.
    pub fn approve_tool_call(
        &self,
        run_id: &str,
        approved: bool,
        reason: Option<String>,
    ) -> Result<()> {
        let handle = self.handle_for(run_id)?;
        tracing::info!(run_id, approved, "tool approval decision");
        if handle.resolve_approval(approved, reason) {
            Ok(())
        } else {
            Err(Error::Invalid(format!(
                "run {run_id} has no pending approval"
            )))
        }
    }

    // ── Subscriptions ─────────────────────────────────────────────

    pub fn subscribe(&self, run_id: &str) -> Subscription {
        self.bus.subscribe(run_id)
    }

    pub fn unsubscribe(&self, run_id: &str, sink_id: u64) {
        self.bus.unsubscribe(run_id, sink_id);
    }

    // ── Introspection / shutdown ──────────────────────────────────

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        self.active.read().contains_key(run_id)
    }

    /// Cancel every active run and close the tool registry.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.active.read().values().cloned().collect();
        tracing::info!(active = handles.len(), "shutting down run manager");
        for handle in handles {
            handle.cancel.cancel();
        }
        if let Err(e) = self.registry.close().await {
            tracing::warn!(error = %e, "tool registry shutdown reported failures");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
