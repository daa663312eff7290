//! kube-forward CLI library
//!
//! Provides the `kube-forward` commands for managing port-forward
//! connections through the orchestrator daemon.

pub mod commands;
pub mod ipc;
pub mod output;
