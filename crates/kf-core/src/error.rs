//! Core error types for kube-forward

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the kube-forward core crate
#[derive(Error, Debug)]
pub enum KfError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection store error
    #[error("Connection store error: {0}")]
    Store(#[from] StoreError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Errors from the persisted connection list
#[derive(Error, Debug)]
pub enum StoreError {
    /// A connection with this ID is already stored
    #[error("Connection with ID {0} already exists")]
    Duplicate(String),

    /// No connection with this ID is stored
    #[error("Connection not found: {0}")]
    NotFound(String),

    /// The connection failed validation
    #[error("Invalid connection: {0}")]
    Invalid(String),

    /// Reading or writing the store file failed
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store file could not be parsed or serialized
    #[error("Store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
