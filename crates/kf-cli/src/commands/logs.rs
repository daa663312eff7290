//! Logs command implementation

use anyhow::Result;

use crate::ipc::DaemonClient;
use crate::output::{format_logs, print_success};

/// Print (or clear) a connection's recent log
pub async fn logs_command(
    client: &mut DaemonClient,
    query: &str,
    limit: Option<usize>,
    clear: bool,
) -> Result<()> {
    let connection = client.resolve(query).await?;
    let id = connection.config.id;

    if clear {
        client.clear_logs(id).await?;
        print_success(&format!("Cleared logs for {}", connection.config.name));
        return Ok(());
    }

    let entries = client.logs(id, limit).await?;
    println!("{}", format_logs(&entries));
    Ok(())
}
