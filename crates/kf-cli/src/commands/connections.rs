//! Connection management commands

use anyhow::Result;

use kf_core::ConnectionConfig;

use crate::ipc::DaemonClient;
use crate::output::{format_connections, print_error, print_status_line, print_success};

/// Execute the list command
pub async fn list_command(client: &mut DaemonClient, long: bool) -> Result<()> {
    let connections = match client.list_connections().await {
        Ok(c) => c,
        Err(e) => {
            print_error(&format!("Failed to list connections: {}", e));
            return Err(e);
        }
    };

    println!("{}", format_connections(&connections, long));
    Ok(())
}

/// Fields of a new connection
#[derive(Debug, Clone)]
pub struct AddOptions {
    pub name: String,
    pub namespace: String,
    pub service: String,
    pub local_port: u16,
    pub remote_port: u16,
    pub relay_port: Option<u16>,
    pub direct_exec: bool,
    pub auto_reconnect: bool,
    pub enabled: bool,
}

impl AddOptions {
    pub fn into_config(self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(
            self.name,
            self.namespace,
            self.service,
            self.local_port,
            self.remote_port,
        );
        config.relay_port = self.relay_port;
        config.use_direct_exec = self.direct_exec;
        config.auto_reconnect = self.auto_reconnect;
        config.is_enabled = self.enabled;
        config
    }
}

pub async fn add_command(client: &mut DaemonClient, options: AddOptions) -> Result<()> {
    let config = options.into_config();
    config.validate()?;

    let snapshot = client.add_connection(config).await?;
    print_success(&format!(
        "Added {} ({}) as {}",
        snapshot.config.name,
        snapshot.config.target(),
        snapshot.config.id
    ));
    Ok(())
}

pub async fn remove_command(client: &mut DaemonClient, query: &str) -> Result<()> {
    let connection = client.resolve(query).await?;
    client.remove_connection(connection.config.id).await?;
    print_success(&format!("Removed {}", connection.config.name));
    Ok(())
}

/// Per-connection lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Start,
    Stop,
    Restart,
}

pub async fn lifecycle_command(client: &mut DaemonClient, query: &str, action: Lifecycle) -> Result<()> {
    let connection = client.resolve(query).await?;
    let id = connection.config.id;

    let result = match action {
        Lifecycle::Start => client.start(id).await,
        Lifecycle::Stop => client.stop(id).await,
        Lifecycle::Restart => client.restart(id).await,
    };
    if let Err(e) = result {
        print_error(&format!("{}: {}", connection.config.name, e));
        return Err(e);
    }

    // Start and restart return before the legs settle; show where it is now
    if let Ok(current) = client.resolve(&id.to_string()).await {
        print_status_line(&current.config.name, current.overall_status());
    }
    Ok(())
}

/// Operation over every connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    StartAll,
    StopAll,
    KillStuck,
}

pub async fn bulk_command(client: &mut DaemonClient, action: BulkAction) -> Result<()> {
    match action {
        BulkAction::StartAll => {
            client.start_all().await?;
            print_success("Starting all enabled connections");
        }
        BulkAction::StopAll => {
            client.stop_all().await?;
            print_success("Stopped all connections");
        }
        BulkAction::KillStuck => {
            client.kill_stuck().await?;
            print_success("Killed all port-forward and relay processes");
        }
    }
    Ok(())
}

/// Execute the free-port command
pub async fn free_port_command(client: &mut DaemonClient, port: u16) -> Result<()> {
    match client.free_port(port).await {
        Ok(0) => print_success(&format!("Nothing was listening on port {}", port)),
        Ok(killed) => print_success(&format!("Freed port {} ({} process(es) killed)", port, killed)),
        Err(e) => {
            print_error(&format!("Failed to free port {}: {}", port, e));
            return Err(e);
        }
    }
    Ok(())
}
