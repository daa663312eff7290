//! IPC client for communicating with the orchestrator
//!
//! Uses TCP on localhost, one JSON request and response per line.

mod client;

pub use client::{parse_port_mapping, resolve_connection, DaemonClient};

pub use kf_core::config::DEFAULT_IPC_PORT;
pub use kf_core::ipc::{ConnectionSnapshot, DaemonStatus, LogEntry};
