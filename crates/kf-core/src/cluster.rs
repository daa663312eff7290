//! Cluster metadata returned by service discovery

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
}

/// A Kubernetes service and the ports it exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: String,
    pub namespace: String,
    /// `ClusterIP`, `NodePort`, `LoadBalancer`, ...
    pub service_type: String,
    pub cluster_ip: Option<String>,
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub name: Option<String>,
    pub port: u16,
    pub target_port: u16,
    pub protocol: Option<String>,
}

impl ServicePort {
    /// `8080 (http)` for named ports, `8080` otherwise
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{} ({})", self.port, name),
            None => self.port.to_string(),
        }
    }
}
