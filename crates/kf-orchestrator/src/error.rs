//! Orchestrator error types

use kf_core::error::StoreError;
use kf_core::ConnectionId;
use thiserror::Error;

/// Failures launching or managing a subprocess
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Required external tool is not installed
    #[error("{0} not found. Install it or set its path in the config file.")]
    ToolNotFound(String),

    /// Spawning the process failed
    #[error("Failed to launch {program}: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing the direct-exec wrapper script failed
    #[error("Failed to write wrapper script: {0}")]
    Script(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the cluster metadata lookup
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("kubectl not found. Install it with your package manager.")]
    ToolNotFound,

    #[error("kubectl failed: {0}")]
    ExecutionFailed(String),

    #[error("Failed to parse kubectl output: {0}")]
    ParseFailed(String),

    #[error("Cannot reach the cluster: {0}")]
    ClusterUnreachable(String),

    #[error("kubectl timed out after {0}s")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    /// Classify a failed invocation by its stderr
    pub fn from_stderr(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        let unreachable = [
            "connection refused",
            "no configuration",
            "dial tcp",
            "unable to connect",
        ];

        if unreachable.iter().any(|needle| lower.contains(needle)) {
            DiscoveryError::ClusterUnreachable(stderr.trim().to_string())
        } else {
            DiscoveryError::ExecutionFailed(stderr.trim().to_string())
        }
    }
}

/// Errors surfaced by the connection manager
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Connection not found: {0}")]
    NotFound(ConnectionId),

    #[error("Invalid connection: {0}")]
    Invalid(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
