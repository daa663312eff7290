//! IPC protocol between the CLI and the orchestrator daemon
//!
//! Newline-delimited JSON over TCP on 127.0.0.1. Each request line gets
//! exactly one response line.

use serde::{Deserialize, Serialize};

use crate::cluster::{Namespace, Service};
use crate::types::{ConnectionConfig, ConnectionId, ConnectionStatus, ProcessRole};

/// Request from the CLI to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    GetStatus,
    ListConnections,
    GetConnection { id: ConnectionId },
    AddConnection { config: ConnectionConfig },
    UpdateConnection { config: ConnectionConfig },
    RemoveConnection { id: ConnectionId },
    Start { id: ConnectionId },
    Stop { id: ConnectionId },
    Restart { id: ConnectionId },
    StartAll,
    StopAll,
    /// System-wide sweep of forward/relay processes
    KillStuck,
    /// Kill whatever listens on a local port
    FreePort { port: u16 },
    /// Most recent log entries, newest last
    GetLogs {
        id: ConnectionId,
        limit: Option<usize>,
    },
    ClearLogs { id: ConnectionId },
    ListNamespaces,
    ListServices { namespace: String },
    Ping,
    Shutdown,
}

/// Response from the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Status(DaemonStatus),
    Connections { connections: Vec<ConnectionSnapshot> },
    Connection(ConnectionSnapshot),
    Logs { entries: Vec<LogEntry> },
    Namespaces { namespaces: Vec<Namespace> },
    Services { services: Vec<Service> },
    PortFreed { port: u16, killed: usize },
    Ok,
    Error { message: String },
    Pong,
}

impl IpcResponse {
    pub fn error(message: impl Into<String>) -> Self {
        IpcResponse::Error {
            message: message.into(),
        }
    }
}

/// Daemon-wide status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub version: String,
    pub pid: u32,
    pub connection_count: usize,
    pub connected_count: usize,
    pub monitoring: bool,
    pub kubectl_path: Option<String>,
    pub socat_path: Option<String>,
}

/// Config plus runtime state of one connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub config: ConnectionConfig,
    pub forward_status: ConnectionStatus,
    pub relay_status: ConnectionStatus,
    pub last_error: Option<String>,
    pub log_count: usize,
}

impl ConnectionSnapshot {
    /// Combined status shown to the user
    ///
    /// An error on either leg wins, then the forward leg's status. In
    /// direct-exec mode the relay leg is the whole connection.
    pub fn overall_status(&self) -> ConnectionStatus {
        if self.forward_status == ConnectionStatus::Error
            || self.relay_status == ConnectionStatus::Error
        {
            return ConnectionStatus::Error;
        }
        if self.config.use_direct_exec {
            return self.relay_status;
        }
        if self.forward_status == ConnectionStatus::Connected
            && self.config.relay_port.is_some()
            && self.relay_status != ConnectionStatus::Connected
        {
            return ConnectionStatus::Connecting;
        }
        self.forward_status
    }
}

/// One line of process output or a manager event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Unix milliseconds
    pub timestamp: u64,
    pub message: String,
    pub role: ProcessRole,
    pub is_error: bool,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, role: ProcessRole, is_error: bool) -> Self {
        Self {
            timestamp: crate::time::current_time_millis(),
            message: message.into(),
            role,
            is_error,
        }
    }
}
