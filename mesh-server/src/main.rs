use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mesh_config::ServiceConfig;
use mesh_primitives::ToolRegistration;
use mesh_registry::{HttpToolRegistry, LivenessConfig, LivenessReporter, ToolRegistry};
use mesh_server::{Server, ServerState, wiring};
use mesh_telemetry::LogFormat;
use tracing::info;

#[derive(Parser)]
#[command(name = "toolmesh-server")]
#[command(version, about = "Capability-matching tool orchestrator")]
struct Cli {
    /// TOML configuration file; `TOOLMESH__*` variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `server.bind`
    #[arg(long)]
    bind: Option<SocketAddr>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API (default)
    Serve,

    /// Register a tool with a running orchestrator and keep it live until interrupted
    Announce(AnnounceArgs),
}

#[derive(Args)]
struct AnnounceArgs {
    /// Base URL of the orchestrator
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    orchestrator: String,

    /// Unique tool name
    #[arg(long)]
    name: String,

    /// Human-readable description
    #[arg(long, default_value = "")]
    description: String,

    /// Endpoint receiving `{"query": ...}` POSTs
    #[arg(long)]
    endpoint: String,

    /// Capability label (repeatable)
    #[arg(long = "capability", required = true)]
    capabilities: Vec<String>,

    /// Seconds between heartbeats
    #[arg(long, default_value = "60")]
    heartbeat_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        ServiceConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    mesh_telemetry::init_tracing(
        &config.telemetry.filter,
        LogFormat::from_json_flag(config.telemetry.json),
    )?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config).await,
        Commands::Announce(args) => announce(args).await,
    }
}

async fn serve(config: &ServiceConfig) -> Result<()> {
    let orchestrator = wiring::build_orchestrator(config).await?;
    let mut server = Server::start(config.server.bind, Arc::new(ServerState::new(orchestrator)))
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!(addr = %server.addr(), "shutting down");
    server.shutdown();
    server.wait().await.context("server terminated with an error")
}

async fn announce(args: AnnounceArgs) -> Result<()> {
    let registry: Arc<dyn ToolRegistry> =
        Arc::new(HttpToolRegistry::new(&args.orchestrator, Duration::from_secs(10))?);
    let registration =
        ToolRegistration::new(args.name, args.description, args.endpoint, args.capabilities)?;
    let defaults = LivenessConfig::default();
    let liveness = LivenessConfig::new(
        Duration::from_secs(args.heartbeat_secs),
        defaults.initial_retry_delay(),
        defaults.max_retry_delay(),
        defaults.max_consecutive_failures(),
    );

    let reporter = LivenessReporter::spawn(registry, registration, liveness)?;
    info!(tool = reporter.tool_name(), orchestrator = %args.orchestrator, "announcing tool");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    reporter
        .shutdown()
        .await
        .context("failed to deregister tool")
}
