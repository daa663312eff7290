//! kube-forward CLI
//!
//! Single binary for the daemon (`serve`) and every management command.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kf_core::config::DaemonConfig;
use kube_forward::commands::{self, AddOptions, BulkAction, Lifecycle};
use kube_forward::ipc::{parse_port_mapping, DaemonClient};
use kube_forward::output::{print_error, print_info, print_success, print_warning};

#[derive(Parser)]
#[command(name = "kube-forward")]
#[command(author, version, about = "Keep Kubernetes port-forwards alive")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Orchestrator IPC port (overrides config)
    #[arg(long, global = true, env = "KUBE_FORWARD_PORT")]
    port: Option<u16>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator daemon
    Serve {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the orchestrator daemon
    Shutdown,

    /// Show orchestrator status
    Status,

    /// List configured connections
    List {
        /// Show detailed information
        #[arg(short, long)]
        long: bool,
    },

    /// Add a port-forward connection
    Add {
        /// Display name
        name: String,
        /// Kubernetes namespace
        #[arg(short, long, default_value = "default")]
        namespace: String,
        /// Service name
        #[arg(short, long)]
        service: String,
        /// Ports as LOCAL:REMOTE (or one port for both)
        #[arg(short, long, value_parser = parse_port_mapping)]
        ports: (u16, u16),
        /// Re-expose the forward on this port through a relay
        #[arg(long)]
        relay: Option<u16>,
        /// Spawn a fresh port-forward for every client on the relay port
        #[arg(long)]
        direct_exec: bool,
        /// Do not restart the connection when it fails
        #[arg(long)]
        no_auto_reconnect: bool,
        /// Add without enabling it
        #[arg(long)]
        disabled: bool,
    },

    /// Remove a connection
    Remove {
        /// Connection ID, ID prefix, or name
        connection: String,
    },

    /// Start a connection
    Start {
        /// Connection ID, ID prefix, or name
        connection: String,
    },

    /// Stop a connection
    Stop {
        /// Connection ID, ID prefix, or name
        connection: String,
    },

    /// Restart a connection
    Restart {
        /// Connection ID, ID prefix, or name
        connection: String,
    },

    /// Start every enabled connection
    StartAll,

    /// Stop every connection
    StopAll,

    /// Kill every port-forward and relay process on this machine
    KillStuck,

    /// Kill whatever is listening on a local port
    FreePort {
        /// Local TCP port
        #[arg(value_name = "PORT")]
        local_port: u16,
    },

    /// Show a connection's recent output
    Logs {
        /// Connection ID, ID prefix, or name
        connection: String,
        /// Number of most recent entries
        #[arg(short = 'n', long)]
        lines: Option<usize>,
        /// Clear the log instead of printing it
        #[arg(long)]
        clear: bool,
    },

    /// List cluster namespaces
    Namespaces,

    /// List services in a namespace
    Services {
        namespace: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show effective configuration
    Show,
    /// Show config directory path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let serving_in_foreground = matches!(cli.command, Some(Commands::Serve { foreground: true }));

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) if serving_in_foreground => "info",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            let mut client = DaemonClient::new(ipc_port(&cli.config, cli.port));
            show_quick_status(&mut client).await;
            return Ok(());
        }
    };

    // Config commands work without a daemon
    if let Commands::Config { action } = &command {
        match action {
            ConfigAction::Show => commands::config_show(cli.config.as_ref())?,
            ConfigAction::Path => commands::config_path(),
        }
        return Ok(());
    }

    if let Commands::Serve { foreground } = command {
        return serve(foreground, cli.config, cli.port).await;
    }

    let mut client = DaemonClient::new(ipc_port(&cli.config, cli.port));

    match command {
        Commands::Shutdown => {
            print_info("Stopping orchestrator...");
            match client.shutdown().await {
                Ok(()) => print_success("Orchestrator stopped"),
                Err(e) if e.to_string().contains("Is it running") => {
                    print_warning("Orchestrator is not running");
                }
                Err(e) => {
                    print_error(&format!("Failed to stop orchestrator: {}", e));
                    return Err(e);
                }
            }
        }

        Commands::Status => commands::status_command(&mut client).await?,

        Commands::List { long } => commands::list_command(&mut client, long).await?,

        Commands::Add {
            name,
            namespace,
            service,
            ports: (local_port, remote_port),
            relay,
            direct_exec,
            no_auto_reconnect,
            disabled,
        } => {
            let options = AddOptions {
                name,
                namespace,
                service,
                local_port,
                remote_port,
                relay_port: relay,
                direct_exec,
                auto_reconnect: !no_auto_reconnect,
                enabled: !disabled,
            };
            commands::add_command(&mut client, options).await?;
        }

        Commands::Remove { connection } => {
            commands::remove_command(&mut client, &connection).await?;
        }

        Commands::Start { connection } => {
            commands::lifecycle_command(&mut client, &connection, Lifecycle::Start).await?;
        }

        Commands::Stop { connection } => {
            commands::lifecycle_command(&mut client, &connection, Lifecycle::Stop).await?;
        }

        Commands::Restart { connection } => {
            commands::lifecycle_command(&mut client, &connection, Lifecycle::Restart).await?;
        }

        Commands::StartAll => commands::bulk_command(&mut client, BulkAction::StartAll).await?,

        Commands::StopAll => commands::bulk_command(&mut client, BulkAction::StopAll).await?,

        Commands::KillStuck => commands::bulk_command(&mut client, BulkAction::KillStuck).await?,

        Commands::FreePort { local_port } => {
            commands::free_port_command(&mut client, local_port).await?;
        }

        Commands::Logs {
            connection,
            lines,
            clear,
        } => {
            commands::logs_command(&mut client, &connection, lines, clear).await?;
        }

        Commands::Namespaces => commands::namespaces_command(&mut client).await?,

        Commands::Services { namespace } => {
            commands::services_command(&mut client, &namespace).await?;
        }

        Commands::Serve { .. } | Commands::Config { .. } => {}
    }

    Ok(())
}

/// IPC port from the flag, else the config file, else the default
fn ipc_port(config_path: &Option<PathBuf>, port_override: Option<u16>) -> u16 {
    if let Some(port) = port_override {
        return port;
    }

    match commands::load_daemon_config(config_path.as_deref()) {
        Ok(config) => config.ipc_port,
        Err(e) => {
            tracing::warn!("{:#}", e);
            DaemonConfig::default().ipc_port
        }
    }
}

// ============================================================================
// Daemon
// ============================================================================

async fn serve(foreground: bool, config_path: Option<PathBuf>, port: Option<u16>) -> Result<()> {
    if !foreground {
        let mut client = DaemonClient::new(ipc_port(&config_path, port));
        if client.ping().await {
            print_warning(&format!("Orchestrator already running on {}", client.address()));
            return Ok(());
        }

        // Daemonize by re-spawning ourselves
        let exe = std::env::current_exe()?;
        let mut cmd = std::process::Command::new(exe);
        cmd.arg("serve").arg("--foreground");
        if let Some(port) = port {
            cmd.arg("--port").arg(port.to_string());
        }
        if let Some(path) = &config_path {
            cmd.arg("--config").arg(path);
        }

        let child = cmd
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;

        print_success(&format!("Orchestrator started (PID: {})", child.id()));
        return Ok(());
    }

    tracing::info!("kube-forward orchestrator starting...");

    let mut config = commands::load_daemon_config(config_path.as_deref())?;
    if let Some(port) = port {
        config.ipc_port = port;
    }

    kf_orchestrator::daemon::run(config, kf_orchestrator::daemon::shutdown_on_signal()).await
}

async fn show_quick_status(client: &mut DaemonClient) {
    println!();
    println!("  \x1b[1;34mkube-forward\x1b[0m - Kubernetes port-forwards that stay up");
    println!();

    if client.ping().await {
        println!("  Orchestrator: \x1b[32m●\x1b[0m Running");
        if let Ok(status) = client.status().await {
            println!(
                "  Connections: {} ({} connected)",
                status.connection_count, status.connected_count
            );
        }
    } else {
        println!("  Orchestrator: \x1b[31m●\x1b[0m Not running");
    }

    println!();
    println!("  Commands:");
    println!("    kube-forward serve                 Start the orchestrator");
    println!("    kube-forward add <name> -s <svc> -p <local:remote>");
    println!("    kube-forward list                  List connections");
    println!("    kube-forward logs <name>           Show a connection's output");
    println!();
}
