//! IPC server implementation
//!
//! Listens on localhost TCP for requests from the CLI. Each client may send
//! any number of requests; every request line gets one response line.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use kf_core::ipc::{DaemonStatus, IpcRequest, IpcResponse};
use kf_core::ConnectionStatus;

use crate::manager::ConnectionManager;

/// IPC server for CLI communication
///
/// Listens on localhost (127.0.0.1) only - not accessible from network.
pub struct IpcServer {
    /// Address to bind (127.0.0.1:port)
    pub address: String,
    manager: Arc<ConnectionManager>,
    start_time: Instant,
    shutdown_token: CancellationToken,
}

impl IpcServer {
    pub fn new(address: String, manager: Arc<ConnectionManager>) -> Self {
        Self {
            address,
            manager,
            start_time: Instant::now(),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Use `token` for shutdown: cancelling it stops the server, and a
    /// `shutdown` request cancels it
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind IPC server to {}", self.address))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        tracing::info!("IPC server listening on {}", local);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        // Only accept connections from localhost
                        if !peer_addr.ip().is_loopback() {
                            tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                            continue;
                        }

                        let manager = Arc::clone(&self.manager);
                        let start_time = self.start_time;
                        let shutdown_token = self.shutdown_token.clone();

                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, manager, start_time, shutdown_token).await {
                                tracing::warn!("IPC client error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept IPC connection: {}", e);
                    }
                },
            }
        }

        tracing::info!("IPC server stopped");
        Ok(())
    }
}

async fn handle_client(
    stream: TcpStream,
    manager: Arc<ConnectionManager>,
    start_time: Instant,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown_token.cancelled() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<IpcRequest>(trimmed) {
            Ok(request) => handle_request(request, &manager, start_time, &shutdown_token).await,
            Err(e) => IpcResponse::error(format!("Invalid request: {}", e)),
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
    }

    Ok(())
}

/// Execute one request against the manager
pub async fn handle_request(
    request: IpcRequest,
    manager: &Arc<ConnectionManager>,
    start_time: Instant,
    shutdown_token: &CancellationToken,
) -> IpcResponse {
    match request {
        IpcRequest::GetStatus => {
            let snapshots = manager.snapshots();
            let connected_count = snapshots
                .iter()
                .filter(|s| s.overall_status() == ConnectionStatus::Connected)
                .count();
            let tools = manager.tools();

            IpcResponse::Status(DaemonStatus {
                running: true,
                uptime_secs: start_time.elapsed().as_secs(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                pid: std::process::id(),
                connection_count: snapshots.len(),
                connected_count,
                monitoring: manager.is_monitoring(),
                kubectl_path: tools.kubectl.as_ref().map(|p| p.display().to_string()),
                socat_path: tools.socat.as_ref().map(|p| p.display().to_string()),
            })
        }

        IpcRequest::ListConnections => IpcResponse::Connections {
            connections: manager.snapshots(),
        },

        IpcRequest::GetConnection { id } => match manager.snapshot(id) {
            Some(snapshot) => IpcResponse::Connection(snapshot),
            None => IpcResponse::error(format!("Connection not found: {}", id)),
        },

        IpcRequest::AddConnection { config } => {
            let id = config.id;
            match manager.add(config).await {
                Ok(()) => match manager.snapshot(id) {
                    Some(snapshot) => IpcResponse::Connection(snapshot),
                    None => IpcResponse::Ok,
                },
                Err(e) => IpcResponse::error(e.to_string()),
            }
        }

        IpcRequest::UpdateConnection { config } => result(manager.update(config).await),

        IpcRequest::RemoveConnection { id } => result(manager.remove(id).await),

        IpcRequest::Start { id } => result(manager.start(id).await),

        IpcRequest::Stop { id } => result(manager.stop(id).await),

        IpcRequest::Restart { id } => result(manager.restart(id).await),

        IpcRequest::StartAll => {
            let started = manager.start_all().await;
            tracing::info!(count = started, "Started connections via IPC");
            IpcResponse::Ok
        }

        IpcRequest::StopAll => {
            manager.stop_all().await;
            IpcResponse::Ok
        }

        IpcRequest::KillStuck => {
            manager.kill_stuck_processes().await;
            IpcResponse::Ok
        }

        IpcRequest::FreePort { port } => match manager.free_port(port).await {
            Ok(killed) => IpcResponse::PortFreed { port, killed },
            Err(e) => IpcResponse::error(e.to_string()),
        },

        IpcRequest::GetLogs { id, limit } => match manager.logs(id, limit) {
            Ok(entries) => IpcResponse::Logs { entries },
            Err(e) => IpcResponse::error(e.to_string()),
        },

        IpcRequest::ClearLogs { id } => result(manager.clear_logs(id)),

        IpcRequest::ListNamespaces => match manager.fetch_namespaces().await {
            Ok(namespaces) => IpcResponse::Namespaces { namespaces },
            Err(e) => IpcResponse::error(e.to_string()),
        },

        IpcRequest::ListServices { namespace } => match manager.fetch_services(&namespace).await {
            Ok(services) => IpcResponse::Services { services },
            Err(e) => IpcResponse::error(e.to_string()),
        },

        IpcRequest::Ping => IpcResponse::Pong,

        IpcRequest::Shutdown => {
            tracing::info!("Shutdown requested via IPC");
            shutdown_token.cancel();
            IpcResponse::Ok
        }
    }
}

fn result<E: std::fmt::Display>(outcome: std::result::Result<(), E>) -> IpcResponse {
    match outcome {
        Ok(()) => IpcResponse::Ok,
        Err(e) => IpcResponse::error(e.to_string()),
    }
}
