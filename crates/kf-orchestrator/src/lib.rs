//! kf-orchestrator: local daemon supervising Kubernetes port-forwards
//!
//! The orchestrator keeps one `kubectl port-forward` (and optionally a
//! `socat` relay) running per configured connection, watches their output
//! and health, repairs them when they fail, and serves the IPC interface
//! used by the CLI.

pub mod daemon;
pub mod discovery;
pub mod error;
pub mod ipc;
pub mod manager;
pub mod notify;
pub mod probe;
pub mod process;
pub mod reconcile;
pub mod state;

pub use discovery::{KubectlDiscovery, MetadataClient, ToolPaths};
pub use error::{DiscoveryError, ManagerError, ProcessError};
pub use ipc::IpcServer;
pub use manager::{ConnectionManager, ManagerOptions};
pub use notify::{CommandNotifier, LogNotifier, Notifier, NotifyKind};
pub use reconcile::Repair;
