//! MCP stdio gateway
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                     MCP GATEWAY                      │
//!   upstream client   │  ┌──────────┐   ┌──────────┐   ┌──────────────────┐  │
//!   ── stdin ────────▶│─▶│  server  │──▶│  router  │──▶│  routing table   │  │
//!                     │  │ (stdio)  │   │          │   │ name ↔ (dest,tool)│  │
//!   ◀─ stdout ────────│◀─│  writer  │   └────┬─────┘   └──────────────────┘  │
//!                     │  └──────────┘        │                               │
//!                     │                      ▼                               │
//!                     │   ┌────────────────────────────────────────────┐     │
//!                     │   │ pool: one connection per destination       │     │
//!                     │   │   breaker → retry → deadline → JSON-RPC    │     │
//!                     │   └───────┬──────────────┬──────────────┬──────┘     │
//!                     └───────────┼──────────────┼──────────────┼────────────┘
//!                                 ▼              ▼              ▼
//!                           tool server A  tool server B  tool server C
//!                           (subprocess)   (subprocess)   (subprocess)
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use mcp_gateway::config::validation::unused_field_warnings;
use mcp_gateway::config::{load_or_default, resolve_config_path, GatewayConfig};
use mcp_gateway::lifecycle;
use mcp_gateway::observability::logging::init_logging;

/// How long blocked stdin reads may hold up process exit.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "mcp-gateway", version)]
#[command(about = "Aggregate MCP tool servers behind a single stdio endpoint", long_about = None)]
struct Cli {
    /// Path to the config file (TOML, or JSON with a .json extension)
    #[arg(short, long, env = "MCP_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level (e.g. debug, info, warn)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let path = resolve_config_path(cli.config.as_deref());
    let mut config = match load_or_default(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mcp-gateway: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    if cli.check {
        return check(&path, &config);
    }

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("mcp-gateway: {e}");
        return ExitCode::FAILURE;
    }

    if path.exists() {
        tracing::info!(path = %path.display(), servers = config.servers.len(), "Configuration loaded");
    } else {
        tracing::warn!(path = %path.display(), "Config file not found, starting with no downstream servers");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build async runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(lifecycle::run(config));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Gateway exited with error");
            ExitCode::FAILURE
        }
    }
}

fn check(path: &std::path::Path, config: &GatewayConfig) -> ExitCode {
    let warnings = unused_field_warnings(config);
    for warning in &warnings {
        eprintln!("warning: {warning}");
    }
    eprintln!(
        "{}: ok ({} servers, {} enabled)",
        path.display(),
        config.servers.len(),
        config.enabled_destinations().count()
    );
    ExitCode::SUCCESS
}
