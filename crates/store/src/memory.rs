//! The in-memory store implementation.
//!
//! One `RwLock` over [`Inner`] protects primary maps and secondary indexes
//! together, so index maintenance is atomic with the write that needs it.
//! All list operations return clones in insertion order.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use parking_lot::RwLock;

use arb_domain::message::Message;
use arb_domain::{Error, Result};

use crate::types::{Event, Run, Session, ToolCallRecord};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    runs: HashMap<String, Run>,
    /// Message and event sequences double as their own insertion-order index.
    messages_by_session: HashMap<String, Vec<Message>>,
    events_by_run: HashMap<String, Vec<Event>>,
    tool_calls_by_run: HashMap<String, Vec<ToolCallRecord>>,
    sessions_by_tenant: HashMap<String, Vec<String>>,
    runs_by_session: HashMap<String, Vec<String>>,
}

impl Inner {
    /// Remove a run and everything hanging off it. The `runs_by_session`
    /// index is left to the caller (session cascade clears it wholesale).
    fn purge_run(&mut self, run_id: &str) {
        self.runs.remove(run_id);
        self.events_by_run.remove(run_id);
        self.tool_calls_by_run.remove(run_id);
    }

    /// Remove a session and cascade to its messages, runs, events, and
    /// tool calls. Updates the tenant index.
    fn purge_session(&mut self, session: &Session) {
        self.messages_by_session.remove(&session.id);
        if let Some(run_ids) = self.runs_by_session.remove(&session.id) {
            for run_id in run_ids {
                self.purge_run(&run_id);
            }
        }
        self.sessions.remove(&session.id);
        if let Some(ids) = self.sessions_by_tenant.get_mut(&session.tenant_id) {
            ids.retain(|id| id != &session.id);
            if ids.is_empty() {
                self.sessions_by_tenant.remove(&session.tenant_id);
            }
        }
    }
}

/// In-memory keyed storage of sessions, runs, messages, events, and
/// tool-call records. Safe for concurrent use.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

fn ensure_id(id: &mut String) {
    if id.is_empty() {
        *id = uuid::Uuid::new_v4().to_string();
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Sessions ──────────────────────────────────────────────────

    /// Insert a session, minting an id if the caller left it empty.
    pub fn create_session(&self, mut session: Session) -> Session {
        ensure_id(&mut session.id);
        let mut inner = self.inner.write();
        inner
            .sessions_by_tenant
            .entry(session.tenant_id.clone())
            .or_default()
            .push(session.id.clone());
        inner.messages_by_session.entry(session.id.clone()).or_default();
        inner.runs_by_session.entry(session.id.clone()).or_default();
        inner.sessions.insert(session.id.clone(), session.clone());
        session
    }

    pub fn get_session(&self, id: &str) -> Result<Session> {
        self.inner
            .read()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session {id}")))
    }

    /// Tenant sessions in insertion order. An offset past the end yields an
    /// empty page, never an error.
    pub fn list_sessions(&self, tenant_id: &str, limit: usize, offset: usize) -> Vec<Session> {
        let inner = self.inner.read();
        let Some(ids) = inner.sessions_by_tenant.get(tenant_id) else {
            return Vec::new();
        };
        ids.iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| inner.sessions.get(id).cloned())
            .collect()
    }

    /// Delete a session, cascading to its messages, runs, and each run's
    /// events and tool calls.
    pub fn delete_session(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("session {id}")))?;
        inner.purge_session(&session);
        Ok(())
    }

    /// Delete a tenant's sessions created before `now - older_than`,
    /// cascading. Returns the number of sessions removed.
    pub fn cleanup_old_sessions(&self, tenant_id: &str, older_than: Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let mut inner = self.inner.write();
        let victims: Vec<Session> = inner
            .sessions_by_tenant
            .get(tenant_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.sessions.get(id))
                    .filter(|s| s.created_at < cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for session in &victims {
            inner.purge_session(session);
        }
        if !victims.is_empty() {
            tracing::debug!(tenant_id, removed = victims.len(), "cleaned up old sessions");
        }
        victims.len()
    }

    // ── Runs ──────────────────────────────────────────────────────

    pub fn create_run(&self, mut run: Run) -> Result<Run> {
        ensure_id(&mut run.id);
        let mut inner = self.inner.write();
        if !inner.sessions.contains_key(&run.session_id) {
            return Err(Error::NotFound(format!("session {}", run.session_id)));
        }
        inner
            .runs_by_session
            .entry(run.session_id.clone())
            .or_default()
            .push(run.id.clone());
        inner.events_by_run.entry(run.id.clone()).or_default();
        inner.tool_calls_by_run.entry(run.id.clone()).or_default();
        inner.runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    pub fn get_run(&self, id: &str) -> Result<Run> {
        self.inner
            .read()
            .runs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("run {id}")))
    }

    /// Apply a mutation to a run. Refreshes `updated_at`; fails with
    /// NotFound on an unknown id. Returns the updated snapshot.
    pub fn update_run<F>(&self, id: &str, f: F) -> Result<Run>
    where
        F: FnOnce(&mut Run),
    {
        let mut inner = self.inner.write();
        let run = inner
            .runs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("run {id}")))?;
        f(run);
        run.updated_at = Utc::now();
        Ok(run.clone())
    }

    pub fn list_runs(&self, session_id: &str) -> Vec<Run> {
        let inner = self.inner.read();
        let Some(ids) = inner.runs_by_session.get(session_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.runs.get(id).cloned())
            .collect()
    }

    /// Delete a run, cascading to its events and tool calls only.
    pub fn delete_run(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let run = inner
            .runs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("run {id}")))?;
        inner.purge_run(id);
        if let Some(ids) = inner.runs_by_session.get_mut(&run.session_id) {
            ids.retain(|rid| rid != id);
        }
        Ok(())
    }

    /// Delete a session's terminal runs created before `now - older_than`.
    /// Live runs are never touched. Returns the number removed.
    pub fn cleanup_old_runs(&self, session_id: &str, older_than: Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let mut inner = self.inner.write();
        let victims: Vec<String> = inner
            .runs_by_session
            .get(session_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.runs.get(id))
                    .filter(|r| r.created_at < cutoff && r.status.is_terminal())
                    .map(|r| r.id.clone())
                    .collect()
            })
            .unwrap_or_default();
        for run_id in &victims {
            inner.purge_run(run_id);
        }
        if let Some(ids) = inner.runs_by_session.get_mut(session_id) {
            ids.retain(|id| !victims.contains(id));
        }
        if !victims.is_empty() {
            tracing::debug!(session_id, removed = victims.len(), "cleaned up old runs");
        }
        victims.len()
    }

    // ── Messages ──────────────────────────────────────────────────

    pub fn add_message(&self, mut message: Message) -> Result<Message> {
        ensure_id(&mut message.id);
        let mut inner = self.inner.write();
        if !inner.sessions.contains_key(&message.session_id) {
            return Err(Error::NotFound(format!("session {}", message.session_id)));
        }
        inner
            .messages_by_session
            .entry(message.session_id.clone())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    pub fn get_messages(&self, session_id: &str) -> Vec<Message> {
        self.inner
            .read()
            .messages_by_session
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    // ── Events ────────────────────────────────────────────────────

    /// Append an event. Persisted events preserve publication order exactly.
    pub fn add_event(&self, mut event: Event) -> Result<Event> {
        ensure_id(&mut event.id);
        let mut inner = self.inner.write();
        if !inner.runs.contains_key(&event.run_id) {
            return Err(Error::NotFound(format!("run {}", event.run_id)));
        }
        inner
            .events_by_run
            .entry(event.run_id.clone())
            .or_default()
            .push(event.clone());
        Ok(event)
    }

    pub fn get_events(&self, run_id: &str) -> Vec<Event> {
        self.inner
            .read()
            .events_by_run
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }

    // ── Tool calls ────────────────────────────────────────────────

    pub fn add_tool_call(&self, mut record: ToolCallRecord) -> Result<ToolCallRecord> {
        ensure_id(&mut record.id);
        let mut inner = self.inner.write();
        if !inner.runs.contains_key(&record.run_id) {
            return Err(Error::NotFound(format!("run {}", record.run_id)));
        }
        inner
            .tool_calls_by_run
            .entry(record.run_id.clone())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    /// Mutate a tool-call record keyed by `(run_id, tool_call_id)`.
    pub fn update_tool_call<F>(&self, run_id: &str, tool_call_id: &str, f: F) -> Result<ToolCallRecord>
    where
        F: FnOnce(&mut ToolCallRecord),
    {
        let mut inner = self.inner.write();
        let record = inner
            .tool_calls_by_run
            .get_mut(run_id)
            .and_then(|recs| recs.iter_mut().find(|r| r.id == tool_call_id))
            .ok_or_else(|| Error::NotFound(format!("tool call {tool_call_id} in run {run_id}")))?;
        f(record);
        Ok(record.clone())
    }

    pub fn get_tool_calls(&self, run_id: &str) -> Vec<ToolCallRecord> {
        self.inner
            .read()
            .tool_calls_by_run
            .get(run_id)
            .cloned()
            .unwrap_or_default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
