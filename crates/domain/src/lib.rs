//! `arb-domain` — shared types for the arbiter agent runtime.
//!
//! Everything here is plain data: the error type used across crates, the
//! conversation message model, tool definitions and result blocks, model
//! streaming events, and the agent configuration surface. No I/O.

pub mod config;
pub mod error;
pub mod message;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
