//! `arb-toolhost` — tool servers and the registry that fronts them.
//!
//! A tool server is a subprocess speaking newline-delimited JSON-RPC 2.0
//! over stdio. The registry spawns servers, performs the handshake,
//! caches each server's tool catalog, and routes invocations — enforcing
//! allow/deny authorization before a subprocess is ever contacted.
//!
//! The transport is a capability set (`request`, `notify`, `is_alive`,
//! `shutdown`); the subprocess flavour is one implementation, and
//! [`transport::InProcessTransport`] provides the same surface for
//! deterministic tests.

pub mod authz;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use authz::{authorize, list_allows, redact_arguments, Authorization, REDACTED};
pub use protocol::ToolSpec;
pub use registry::{ToolOutcome, ToolRegistry};
pub use transport::{InProcessTransport, StdioTransport, ToolTransport, TransportError};
