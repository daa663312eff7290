//! Shared fixtures for orchestrator integration tests
//!
//! External tools are replaced with tiny shell scripts that ignore their
//! arguments. Each harness gets its own scripts with unique file names so
//! system-wide process sweeps from one test never match another test's
//! processes.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::net::TcpListener;

use kf_core::cluster::{Namespace, Service, ServicePort};
use kf_core::config::Timings;
use kf_core::{ConnectionConfig, ConnectionId, ConnectionStore};
use kf_orchestrator::discovery::{MetadataClient, ToolPaths};
use kf_orchestrator::error::DiscoveryError;
use kf_orchestrator::notify::RecordingNotifier;
use kf_orchestrator::{ConnectionManager, ManagerOptions};

/// Tool that stays up until killed
pub const LONG_RUNNING: &str = "exec sleep 30";

pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn unique_name(tool: &str) -> String {
    format!("{}-{}", tool, ConnectionId::new())
}

pub fn test_timings() -> Timings {
    Timings {
        forward_settle: Duration::from_millis(200),
        relay_settle: Duration::from_millis(100),
        restart_delay: Duration::from_millis(50),
        kill_settle: Duration::from_millis(20),
        tick_interval: Duration::from_millis(100),
        recent_error_window: Duration::from_secs(2),
        probe_timeout: Duration::from_millis(200),
    }
}

/// Fixed cluster metadata
pub struct StubDiscovery;

#[async_trait]
impl MetadataClient for StubDiscovery {
    async fn fetch_namespaces(&self) -> Result<Vec<Namespace>, DiscoveryError> {
        Ok(vec![
            Namespace {
                name: "default".to_string(),
            },
            Namespace {
                name: "staging".to_string(),
            },
        ])
    }

    async fn fetch_services(&self, namespace: &str) -> Result<Vec<Service>, DiscoveryError> {
        if namespace != "default" {
            return Err(DiscoveryError::ExecutionFailed(format!(
                "namespaces \"{}\" not found",
                namespace
            )));
        }
        Ok(vec![Service {
            name: "api".to_string(),
            namespace: "default".to_string(),
            service_type: "ClusterIP".to_string(),
            cluster_ip: Some("10.0.0.12".to_string()),
            ports: vec![ServicePort {
                name: Some("http".to_string()),
                port: 80,
                target_port: 8080,
                protocol: Some("TCP".to_string()),
            }],
        }])
    }
}

/// Which fake tools to install
#[derive(Clone, Copy)]
pub struct Tools<'a> {
    pub kubectl: Option<&'a str>,
    pub socat: Option<&'a str>,
}

impl Default for Tools<'_> {
    fn default() -> Self {
        Self {
            kubectl: Some(LONG_RUNNING),
            socat: Some(LONG_RUNNING),
        }
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub manager: Arc<ConnectionManager>,
    pub notifier: RecordingNotifier,
    pub store: ConnectionStore,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_tools(Tools::default()).await
    }

    pub async fn with_tools(tools: Tools<'_>) -> Self {
        let dir = TempDir::new().unwrap();

        let kubectl = tools
            .kubectl
            .map(|body| fake_tool(dir.path(), &unique_name("kubectl"), body));
        let socat = tools
            .socat
            .map(|body| fake_tool(dir.path(), &unique_name("socat"), body));

        let scripts = dir.path().join("scripts");
        std::fs::create_dir_all(&scripts).unwrap();

        let options = ManagerOptions {
            timings: test_timings(),
            tools: ToolPaths::fixed(kubectl, socat),
            notifications_enabled: true,
            script_dir: Some(scripts),
        };

        let store = ConnectionStore::with_path(dir.path().join("connections.json"));
        let notifier = RecordingNotifier::new();
        let manager = ConnectionManager::open(
            store.clone(),
            options,
            Arc::new(notifier.clone()),
            Arc::new(StubDiscovery),
        )
        .await
        .unwrap();

        Self {
            dir,
            manager,
            notifier,
            store,
        }
    }

    /// Register a connection with the given ports
    pub async fn add(&self, name: &str, local_port: u16, relay_port: Option<u16>) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(name, "default", name, local_port, 80);
        config.relay_port = relay_port;
        self.manager.add(config.clone()).await.unwrap();
        config
    }

    pub fn script_dir(&self) -> PathBuf {
        self.dir.path().join("scripts")
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}

/// Listener that makes health probes against its port succeed
pub async fn open_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// A port with nothing listening on it
pub async fn closed_port() -> u16 {
    let (listener, port) = open_port().await;
    drop(listener);
    port
}

/// Poll `check` until it holds or `limit` passes
pub async fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
