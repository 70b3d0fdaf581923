//! `arb-store` — in-memory state store for the arbiter runtime.
//!
//! Owns every persisted entity: sessions, runs, messages, run events, and
//! tool-call records, together with the secondary indexes
//! (`sessions_by_tenant`, `runs_by_session`, ...). One reader-writer lock
//! protects the whole store; every read returns a snapshot clone, so callers
//! never observe later mutations through returned values.

pub mod memory;
pub mod types;

pub use memory::MemoryStore;
pub use types::{Event, EventType, Run, RunMode, RunStatus, Session, ToolCallRecord, ToolCallStatus};
