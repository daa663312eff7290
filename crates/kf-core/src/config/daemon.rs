//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_millis;

/// Default IPC port for CLI/daemon communication
pub const DEFAULT_IPC_PORT: u16 = 22240;

/// Configuration for the orchestrator daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// IPC port for CLI communication (localhost only)
    pub ipc_port: u16,

    /// Explicit path to kubectl (searched for when unset)
    pub kubectl_path: Option<PathBuf>,

    /// Explicit path to socat (searched for when unset)
    pub socat_path: Option<PathBuf>,

    /// Whether connect/disconnect notifications are delivered at all
    pub notifications_enabled: bool,

    /// Program invoked as `<program> <title> <body>` for notifications
    pub notify_command: Option<String>,

    /// Override for the persisted connection list location
    pub connections_file: Option<PathBuf>,

    /// Settle delays and monitoring periods
    pub timings: Timings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            ipc_port: DEFAULT_IPC_PORT,
            kubectl_path: None,
            socat_path: None,
            notifications_enabled: true,
            notify_command: None,
            connections_file: None,
            timings: Timings::default(),
        }
    }
}

impl DaemonConfig {
    /// Get the IPC address (localhost:port)
    pub fn ipc_address(&self) -> String {
        format!("127.0.0.1:{}", self.ipc_port)
    }

    /// Resolved path of the persisted connection list
    pub fn connections_path(&self) -> PathBuf {
        self.connections_file
            .clone()
            .unwrap_or_else(super::default_connections_path)
    }
}

/// Fixed delays used by the connection manager and reconciliation loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Wait after launching the forward process before trusting liveness
    #[serde(with = "duration_millis")]
    pub forward_settle: Duration,

    /// Wait after launching the relay process before trusting liveness
    #[serde(with = "duration_millis")]
    pub relay_settle: Duration,

    /// Pause between stop and start on restart
    #[serde(with = "duration_millis")]
    pub restart_delay: Duration,

    /// Pause between cancelling tasks and the system-wide sweep
    #[serde(with = "duration_millis")]
    pub kill_settle: Duration,

    /// Reconciliation loop period
    #[serde(with = "duration_millis")]
    pub tick_interval: Duration,

    /// How long an error line counts as "recent"
    #[serde(with = "duration_millis")]
    pub recent_error_window: Duration,

    /// Connect timeout of the TCP health probe
    #[serde(with = "duration_millis")]
    pub probe_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            forward_settle: Duration::from_secs(2),
            relay_settle: Duration::from_secs(1),
            restart_delay: Duration::from_millis(500),
            kill_settle: Duration::from_millis(200),
            tick_interval: Duration::from_secs(1),
            recent_error_window: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(1),
        }
    }
}
