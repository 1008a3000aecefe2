#![forbid(unsafe_code)]

//! `readium-probe` — debug client for Readium MCP servers.
//!
//! Checks server health, opens the SSE stream, resolves the session id, then
//! runs `initialize` → `tools/list` → `call_tool` and prints what came back.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use readium_probe::config::ClientConfig;
use readium_probe::session::report;
use readium_probe::session::supervisor::SessionSupervisor;
use readium_probe::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "readium-probe", about = "Debug client for Readium MCP servers", version, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the server origin, e.g. `http://localhost:8000`.
    #[arg(long)]
    base_url: Option<String>,

    /// Override the tool invoked after listing.
    #[arg(long)]
    tool: Option<String>,

    /// Documentation path, repository, or URL passed as the tool's `path`.
    #[arg(long)]
    path: Option<String>,

    /// Branch passed as the tool's `branch`.
    #[arg(long)]
    branch: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("readium-probe starting");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = load_config(args)?;
    let tool_name = config.tool.name.clone();

    let mut supervisor = SessionSupervisor::new(config)?;
    match supervisor.run().await {
        Ok(outcome) => {
            print!("{}", report::render(&outcome, &tool_name));
            info!("readium-probe finished");
            Ok(())
        }
        Err(err) => {
            error!(%err, state = ?supervisor.state(), "session failed");
            Err(err)
        }
    }
}

fn load_config(args: Cli) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from_path(path)?,
        None => ClientConfig::default(),
    };

    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(tool) = args.tool {
        config.tool.name = tool;
    }
    if let Some(path) = args.path {
        config.tool.arguments.insert("path".into(), Value::String(path));
    }
    if let Some(branch) = args.branch {
        config
            .tool
            .arguments
            .insert("branch".into(), Value::String(branch));
    }

    config.validate()?;
    info!(base_url = %config.base_url, tool = %config.tool.name, "configuration loaded");
    Ok(config)
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
