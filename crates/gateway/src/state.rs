use std::sync::Arc;

use arb_store::MemoryStore;
use arb_toolhost::ToolRegistry;

use crate::runtime::manager::RunManager;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub registry: Arc<ToolRegistry>,
    pub manager: Arc<RunManager>,
}
