use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use arb_domain::config::AgentConfig;
use arb_gateway::api;
use arb_gateway::runtime::{bus::EventBus, manager::RunManager};
use arb_gateway::state::AppState;
use arb_model::{ModelClient, OpenAiClient};
use arb_store::MemoryStore;
use arb_toolhost::ToolRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CLI
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Parser)]
#[command(name = "arbiter", version, about = "Agent runtime gateway")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "arbiter.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default).
    Serve,
    /// Parse and validate the configuration file, then exit.
    Validate,
    /// Print the version.
    Version,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct GatewayConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    agent: AgentConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct ServerConfig {
    #[serde(default = "d_listen")]
    listen: String,
    /// Cap on simultaneously served requests (backpressure protection).
    #[serde(default = "d_max_concurrent")]
    max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: d_listen(),
            max_concurrent_requests: d_max_concurrent(),
        }
    }
}

fn d_listen() -> String {
    "127.0.0.1:8080".into()
}

fn d_max_concurrent() -> usize {
    256
}

/// Load the config file; a missing file means defaults.
fn load_config(path: &Path) -> anyhow::Result<GatewayConfig> {
    if !path.exists() {
        return Ok(GatewayConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = load_config(&cli.config)?;
            serve(config).await
        }
        Some(Command::Validate) => {
            let config = load_config(&cli.config)?;
            println!(
                "configuration OK: {} tool server(s), model {}/{}",
                config.agent.servers.len(),
                config.agent.model.provider,
                config.agent.model.model,
            );
            Ok(())
        }
        Some(Command::Version) => {
            println!("arbiter {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(ToolRegistry::new());

    let loaded = registry.load_all(&config.agent.servers).await;
    tracing::info!(
        loaded,
        configured = config.agent.servers.len(),
        "tool servers loaded"
    );

    let model: Arc<dyn ModelClient> = Arc::new(OpenAiClient::from_config(&config.agent.model)?);
    let manager = RunManager::new(
        store.clone(),
        bus,
        registry.clone(),
        model,
        config.agent.clone(),
    );

    let state = AppState {
        store,
        registry,
        manager: manager.clone(),
    };

    let max_concurrent = config.server.max_concurrent_requests.max(1);
    tracing::info!(max_concurrent, "concurrency limit set");
    let app = api::router(state)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("binding {}", config.server.listen))?;
    tracing::info!(listen = %config.server.listen, "arbiter gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
