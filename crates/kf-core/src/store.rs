//! Persisted connection list
//!
//! Connections live in a JSON document (`connections.json` in the config
//! directory). Every mutation rewrites the whole file through a temp file
//! and a rename so a crash never leaves a half-written list behind.
//! Mutations are serialized per store; clones share the same lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{ConnectionConfig, ConnectionId};

/// On-disk document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionList {
    pub connections: Vec<ConnectionConfig>,
}

/// File-backed, ordered store of connection configurations
#[derive(Debug, Clone)]
pub struct ConnectionStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl ConnectionStore {
    /// Store at the default location in the config directory
    pub fn new() -> Self {
        Self::with_path(crate::config::default_connections_path())
    }

    /// Store at a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full list; a missing file is an empty list
    pub async fn load(&self) -> Result<ConnectionList, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ConnectionList::default())
            }
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_str(&content)?)
    }

    /// Write the full list atomically
    pub async fn save(&self, list: &ConnectionList) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write(list).await
    }

    // Caller holds `write_lock`.
    async fn write(&self, list: &ConnectionList) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self
            .path
            .with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        let content = serde_json::to_string_pretty(list)?;
        fs::write(&temp_path, content).await?;
        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        tracing::debug!(path = %self.path.display(), count = list.connections.len(), "Saved connection list");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ConnectionConfig>, StoreError> {
        Ok(self.load().await?.connections)
    }

    pub async fn get(&self, id: ConnectionId) -> Result<Option<ConnectionConfig>, StoreError> {
        Ok(self.load().await?.connections.into_iter().find(|c| c.id == id))
    }

    /// Append a connection, rejecting duplicate IDs
    pub async fn add(&self, connection: ConnectionConfig) -> Result<(), StoreError> {
        connection.validate()?;
        let _guard = self.write_lock.lock().await;
        let mut list = self.load().await?;

        if list.connections.iter().any(|c| c.id == connection.id) {
            return Err(StoreError::Duplicate(connection.id.to_string()));
        }

        list.connections.push(connection);
        self.write(&list).await
    }

    /// Replace a connection in place, keeping its position
    pub async fn update(&self, connection: ConnectionConfig) -> Result<(), StoreError> {
        connection.validate()?;
        let _guard = self.write_lock.lock().await;
        let mut list = self.load().await?;

        let Some(existing) = list.connections.iter_mut().find(|c| c.id == connection.id) else {
            return Err(StoreError::NotFound(connection.id.to_string()));
        };

        *existing = connection;
        self.write(&list).await
    }

    pub async fn remove(&self, id: ConnectionId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut list = self.load().await?;
        let original_len = list.connections.len();

        list.connections.retain(|c| c.id != id);
        if list.connections.len() == original_len {
            return Err(StoreError::NotFound(id.to_string()));
        }

        self.write(&list).await
    }
}

impl Default for ConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}
