//! kube-forward Orchestrator Daemon
//!
//! Loads the persisted connections, starts the enabled ones, keeps them
//! healthy and answers CLI requests until told to stop.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kf_core::config::{self, DaemonConfig};
use kf_orchestrator::daemon;

#[derive(Parser)]
#[command(name = "kf-orchestrator")]
#[command(about = "kube-forward orchestrator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IPC port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { args.log_level.as_str() };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("kube-forward orchestrator starting...");

    // Load configuration
    let mut config: DaemonConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        config::load_or_default(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            DaemonConfig::default()
        })
    };

    if let Some(port) = args.port {
        config.ipc_port = port;
    }

    daemon::run(config, daemon::shutdown_on_signal()).await
}
