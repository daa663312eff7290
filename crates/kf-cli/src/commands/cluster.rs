//! Namespace and service discovery commands

use anyhow::Result;

use crate::ipc::DaemonClient;
use crate::output::{format_namespaces, format_services, print_error};

pub async fn namespaces_command(client: &mut DaemonClient) -> Result<()> {
    match client.namespaces().await {
        Ok(namespaces) => {
            println!("{}", format_namespaces(&namespaces));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to list namespaces: {}", e));
            Err(e)
        }
    }
}

pub async fn services_command(client: &mut DaemonClient, namespace: &str) -> Result<()> {
    match client.services(namespace).await {
        Ok(services) => {
            println!("{}", format_services(&services));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to list services in {}: {}", namespace, e));
            Err(e)
        }
    }
}
