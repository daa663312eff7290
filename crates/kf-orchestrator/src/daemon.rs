//! Daemon entry point shared by the `kf-orchestrator` binary and
//! `kube-forward serve`

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use kf_core::config::DaemonConfig;
use kf_core::pidfile::{self, PidFileGuard};
use kf_core::ConnectionStore;

use crate::discovery::{KubectlDiscovery, ToolPaths};
use crate::ipc::IpcServer;
use crate::manager::{ConnectionManager, ManagerOptions};
use crate::notify::{CommandNotifier, LogNotifier, Notifier};

/// Run the daemon until `cancel` fires or a client requests shutdown
///
/// Every connection is stopped before this returns.
pub async fn run(config: DaemonConfig, cancel: CancellationToken) -> Result<()> {
    let _pid_guard = PidFileGuard::acquire(pidfile::default_pid_path(), std::process::id())
        .context("Another orchestrator appears to be running")?;

    let tools = ToolPaths::resolve(config.kubectl_path.as_deref(), config.socat_path.as_deref());
    match &tools.kubectl {
        Some(path) => tracing::info!("Using kubectl at {}", path.display()),
        None => tracing::warn!("kubectl not found; connections cannot start until it is installed"),
    }
    match &tools.socat {
        Some(path) => tracing::info!("Using socat at {}", path.display()),
        None => tracing::warn!("socat not found; relay and direct-exec connections will fail"),
    }

    let notifier: Arc<dyn Notifier> = match &config.notify_command {
        Some(program) => Arc::new(CommandNotifier::new(program.clone())),
        None => Arc::new(LogNotifier),
    };
    let discovery = Arc::new(KubectlDiscovery::new(tools.kubectl.clone()));

    let options = ManagerOptions {
        timings: config.timings.clone(),
        tools,
        notifications_enabled: config.notifications_enabled,
        script_dir: None,
    };
    let store = ConnectionStore::with_path(config.connections_path());
    let manager = ConnectionManager::open(store, options, notifier, discovery)
        .await
        .context("Failed to load connections")?;

    // Leftovers from a previous run that did not shut down cleanly
    manager.supervisor().sweep_orphans().await;

    let started = manager.start_all().await;
    tracing::info!("Started {} connection(s)", started);

    let server = IpcServer::new(config.ipc_address(), Arc::clone(&manager)).with_shutdown_token(cancel);
    let served = server.run().await;

    tracing::info!("Stopping all connections...");
    manager.shutdown().await;

    served?;
    tracing::info!("Orchestrator shutdown complete");
    Ok(())
}

/// Token cancelled on Ctrl+C or SIGTERM
pub fn shutdown_on_signal() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    cancel
}
