//! `arb-gateway` — the arbiter runtime's orchestration and HTTP surface.
//!
//! Houses the run executor (the agent reasoning loop), the per-run event
//! bus, the run manager, the two stream-bridge dialects, and the axum API
//! that fronts them.

pub mod api;
pub mod runtime;
pub mod state;
pub mod stream;
