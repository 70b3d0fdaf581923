//! `arb-model` — the model client consumed by the run executor.
//!
//! The executor only sees the [`ModelClient`] trait; swapping vendors means
//! swapping implementations. This crate ships:
//! - [`OpenAiClient`] — an adapter for any OpenAI-compatible chat endpoint.
//! - [`ScriptedClient`] — a deterministic in-process client for tests.

pub mod client;
pub mod openai;
pub mod script;
mod sse;

pub use client::{ChatRequest, ChatResponse, ModelClient};
pub use openai::OpenAiClient;
pub use script::ScriptedClient;
