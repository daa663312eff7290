//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StoreError;

/// Stable identifier of a configured connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Generate a fresh random ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// The two kinds of process a connection can own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRole {
    /// `kubectl port-forward` leg
    Forward,
    /// `socat` relay leg
    Relay,
}

impl ProcessRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessRole::Forward => "forward",
            ProcessRole::Relay => "relay",
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one leg of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not running
    #[default]
    Disconnected,
    /// Process launched, waiting for it to settle
    Connecting,
    /// Process alive after its settle delay
    Connected,
    /// Last attempt failed
    Error,
}

impl ConnectionStatus {
    /// Whether a start attempt may be issued from this status
    pub fn can_retry(&self) -> bool {
        !matches!(self, ConnectionStatus::Connecting)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Persisted, user-editable configuration of one tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub id: ConnectionId,
    pub name: String,
    pub namespace: String,
    pub service: String,
    pub local_port: u16,
    pub remote_port: u16,
    /// External port re-exposing the forward leg (relay leg)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_port: Option<u16>,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// Spawn a fresh forwarder per inbound client through the relay
    #[serde(default)]
    pub use_direct_exec: bool,
    #[serde(default = "default_true")]
    pub notify_on_connect: bool,
    #[serde(default = "default_true")]
    pub notify_on_disconnect: bool,
}

impl ConnectionConfig {
    /// Create an enabled, auto-reconnecting configuration with a fresh ID
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        service: impl Into<String>,
        local_port: u16,
        remote_port: u16,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            name: name.into(),
            namespace: namespace.into(),
            service: service.into(),
            local_port,
            remote_port,
            relay_port: None,
            is_enabled: true,
            auto_reconnect: true,
            use_direct_exec: false,
            notify_on_connect: true,
            notify_on_disconnect: true,
        }
    }

    /// Port that clients should connect to
    pub fn effective_port(&self) -> u16 {
        self.relay_port.unwrap_or(self.local_port)
    }

    /// `namespace/service` target label
    pub fn target(&self) -> String {
        format!("{}/{}", self.namespace, self.service)
    }

    /// Check the port invariants
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.local_port == 0 {
            return Err(StoreError::Invalid("local port must be positive".to_string()));
        }
        if self.remote_port == 0 {
            return Err(StoreError::Invalid("remote port must be positive".to_string()));
        }
        match self.relay_port {
            Some(0) => Err(StoreError::Invalid("relay port must be positive".to_string())),
            Some(relay) if relay == self.local_port => Err(StoreError::Invalid(format!(
                "relay port {} must differ from local port",
                relay
            ))),
            _ => Ok(()),
        }
    }
}
