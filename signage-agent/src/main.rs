//! Signage Agent - main entry point
//!
//! Resolves the root folder and bootstrap config, starts the agent runtime
//! and runs until Ctrl+C or SIGTERM.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use signage_common::config::{default_config_path, load_toml_or_default, RootFolderResolver};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use signage_agent::config::{ConfigFile, StoragePaths};
use signage_agent::upstream::HttpUpstream;
use signage_agent::{AgentContext, AgentRuntime};

/// Command-line arguments for signage-agent
#[derive(Parser, Debug)]
#[command(name = "signage-agent")]
#[command(about = "Content sync and schedule agent for a signage display")]
#[command(version)]
struct Args {
    /// Root folder for the content library and persisted state
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Bootstrap config file
    #[arg(short, long, env = "SIGNAGE_CONFIG")]
    config: Option<PathBuf>,

    /// CMS base URL (overrides the config file)
    #[arg(long, env = "SIGNAGE_CMS_URL")]
    cms_url: Option<String>,

    /// Log level filter when RUST_LOG is unset (overrides the config file)
    #[arg(long, env = "SIGNAGE_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config: ConfigFile = config_path
        .as_deref()
        .map(load_toml_or_default)
        .unwrap_or_default();

    init_tracing(&args, &config)?;

    if let Some(path) = config_path.as_deref().filter(|p| !p.exists()) {
        warn!(path = %path.display(), "Config file not found, using built-in defaults");
    }

    let root = RootFolderResolver::new()
        .with_cli_arg(args.root_folder.as_deref())
        .with_toml_value(config.root_folder.as_deref())
        .resolve();
    if let Some(url) = args.cms_url {
        config.agent.cms_url = url;
    }

    info!("Starting signage agent v{}", env!("CARGO_PKG_VERSION"));
    info!(root = %root.display(), cms = %config.agent.cms_url, "Configuration resolved");

    let paths = StoragePaths::new(root);
    paths
        .ensure()
        .with_context(|| format!("Failed to create {}", paths.library().display()))?;

    let upstream = Arc::new(
        HttpUpstream::new(&config.agent).context("Failed to build CMS client")?,
    );
    let ctx = AgentContext::new(config.agent, paths);
    let runtime = AgentRuntime::start(ctx, upstream).context("Failed to start agent runtime")?;

    shutdown_signal().await;

    runtime.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins, then `--log-level`, then the `[logging]` table
fn init_tracing(args: &Args, config: &ConfigFile) -> Result<()> {
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("signage_agent={level},signage_common={level}").into()
    });

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
