//! Tool lookup and cluster metadata discovery

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use kf_core::cluster::{Namespace, Service, ServicePort};

use crate::error::DiscoveryError;

/// Install locations checked before `PATH`
const CANDIDATE_DIRS: &[&str] = &["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"];

/// Overall limit on one kubectl metadata call
const KUBECTL_TIMEOUT: Duration = Duration::from_secs(15);

/// Resolved locations of the external tools
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPaths {
    pub kubectl: Option<PathBuf>,
    pub socat: Option<PathBuf>,
}

impl ToolPaths {
    /// Resolve both tools, honouring explicit overrides
    pub fn resolve(kubectl: Option<&Path>, socat: Option<&Path>) -> Self {
        Self {
            kubectl: find_tool("kubectl", kubectl),
            socat: find_tool("socat", socat),
        }
    }

    /// Use exactly these paths without searching
    pub fn fixed(kubectl: Option<PathBuf>, socat: Option<PathBuf>) -> Self {
        Self { kubectl, socat }
    }
}

/// Locate `name`: override, then candidate dirs, then `PATH`
pub fn find_tool(name: &str, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(tool = name, path = %path.display(), "Configured tool path does not exist");
    }

    let candidates = CANDIDATE_DIRS.iter().map(PathBuf::from);
    let path_dirs = std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>())
        .unwrap_or_default();

    candidates
        .chain(path_dirs)
        .map(|dir| dir.join(name))
        .find(|path| path.is_file())
}

/// Source of namespaces and services
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn fetch_namespaces(&self) -> Result<Vec<Namespace>, DiscoveryError>;

    async fn fetch_services(&self, namespace: &str) -> Result<Vec<Service>, DiscoveryError>;
}

/// Metadata lookups through `kubectl get ... -o json`
pub struct KubectlDiscovery {
    kubectl: Option<PathBuf>,
    timeout: Duration,
}

impl KubectlDiscovery {
    pub fn new(kubectl: Option<PathBuf>) -> Self {
        Self {
            kubectl,
            timeout: KUBECTL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: &[&str]) -> Result<String, DiscoveryError> {
        let kubectl = self.kubectl.as_ref().ok_or(DiscoveryError::ToolNotFound)?;

        // A timed-out call drops the child; it must not outlive the request.
        let mut command = Command::new(kubectl);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| DiscoveryError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            return Err(DiscoveryError::from_stderr(&String::from_utf8_lossy(
                &output.stderr,
            )));
        }

        String::from_utf8(output.stdout).map_err(|e| DiscoveryError::ParseFailed(e.to_string()))
    }
}

#[async_trait]
impl MetadataClient for KubectlDiscovery {
    async fn fetch_namespaces(&self) -> Result<Vec<Namespace>, DiscoveryError> {
        let json = self
            .run(&["get", "namespaces", "-o", "json", "--request-timeout=10s"])
            .await?;
        parse_namespaces(&json)
    }

    async fn fetch_services(&self, namespace: &str) -> Result<Vec<Service>, DiscoveryError> {
        let json = self
            .run(&[
                "get",
                "services",
                "-n",
                namespace,
                "-o",
                "json",
                "--request-timeout=10s",
            ])
            .await?;
        parse_services(&json)
    }
}

#[derive(Deserialize)]
struct ItemList<T> {
    items: Vec<T>,
}

#[derive(Deserialize)]
struct NamespaceItem {
    metadata: Metadata,
}

#[derive(Deserialize)]
struct Metadata {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Deserialize)]
struct ServiceItem {
    metadata: Metadata,
    spec: ServiceSpec,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceSpec {
    #[serde(rename = "type")]
    service_type: Option<String>,
    #[serde(rename = "clusterIP")]
    cluster_ip: Option<String>,
    #[serde(default)]
    ports: Vec<PortSpec>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortSpec {
    name: Option<String>,
    port: u16,
    target_port: Option<TargetPort>,
    protocol: Option<String>,
}

/// `targetPort` is either a number or a named container port
#[derive(Deserialize)]
#[serde(untagged)]
enum TargetPort {
    Number(u16),
    Named(String),
}

/// Parse `kubectl get namespaces -o json`, sorted by name
pub fn parse_namespaces(json: &str) -> Result<Vec<Namespace>, DiscoveryError> {
    let list: ItemList<NamespaceItem> =
        serde_json::from_str(json).map_err(|e| DiscoveryError::ParseFailed(e.to_string()))?;

    let mut namespaces: Vec<_> = list
        .items
        .into_iter()
        .map(|item| Namespace {
            name: item.metadata.name,
        })
        .collect();
    namespaces.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(namespaces)
}

/// Parse `kubectl get services -o json`, sorted by name
pub fn parse_services(json: &str) -> Result<Vec<Service>, DiscoveryError> {
    let list: ItemList<ServiceItem> =
        serde_json::from_str(json).map_err(|e| DiscoveryError::ParseFailed(e.to_string()))?;

    let mut services: Vec<_> = list
        .items
        .into_iter()
        .map(|item| Service {
            name: item.metadata.name,
            namespace: item.metadata.namespace.unwrap_or_default(),
            service_type: item
                .spec
                .service_type
                .unwrap_or_else(|| "ClusterIP".to_string()),
            cluster_ip: item.spec.cluster_ip,
            ports: item
                .spec
                .ports
                .into_iter()
                .map(|port| ServicePort {
                    name: port.name,
                    port: port.port,
                    target_port: match port.target_port {
                        Some(TargetPort::Number(target)) => target,
                        Some(TargetPort::Named(_)) | None => port.port,
                    },
                    protocol: port.protocol,
                })
                .collect(),
        })
        .collect();
    services.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(services)
}
