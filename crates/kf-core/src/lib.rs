//! kf-core: Core types and configuration for kube-forward
//!
//! This crate provides the connection model, persisted configuration,
//! and the IPC protocol shared by the orchestrator daemon and the CLI.

pub mod cluster;
pub mod config;
pub mod error;
pub mod ipc;
pub mod pidfile;
pub mod store;
pub mod time;
pub mod types;

pub use error::KfError;
pub use store::ConnectionStore;
pub use types::{ConnectionConfig, ConnectionId, ConnectionStatus, ProcessRole};
