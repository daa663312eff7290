//! IPC client for communicating with the orchestrator daemon

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use kf_core::cluster::{Namespace, Service};
use kf_core::ipc::{ConnectionSnapshot, DaemonStatus, IpcRequest, IpcResponse, LogEntry};
use kf_core::{ConnectionConfig, ConnectionId};

/// Client for the orchestrator daemon
pub struct DaemonClient {
    address: String,
    stream: Option<BufReader<TcpStream>>,
}

impl DaemonClient {
    /// Client for `127.0.0.1:port`
    pub fn new(port: u16) -> Self {
        Self::with_address(format!("127.0.0.1:{}", port))
    }

    pub fn with_address(address: String) -> Self {
        Self {
            address,
            stream: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        tracing::debug!("Connecting to orchestrator at {}", self.address);

        let stream = TcpStream::connect(&self.address).await.with_context(|| {
            format!(
                "Failed to connect to orchestrator at {}. Is it running?",
                self.address
            )
        })?;

        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    /// Whether a daemon answers on the address
    pub async fn ping(&mut self) -> bool {
        matches!(self.send_request(IpcRequest::Ping).await, Ok(IpcResponse::Pong))
    }

    pub async fn status(&mut self) -> Result<DaemonStatus> {
        match self.send_request(IpcRequest::GetStatus).await? {
            IpcResponse::Status(status) => Ok(status),
            other => unexpected(other),
        }
    }

    pub async fn list_connections(&mut self) -> Result<Vec<ConnectionSnapshot>> {
        match self.send_request(IpcRequest::ListConnections).await? {
            IpcResponse::Connections { connections } => Ok(connections),
            other => unexpected(other),
        }
    }

    pub async fn add_connection(&mut self, config: ConnectionConfig) -> Result<ConnectionSnapshot> {
        match self.send_request(IpcRequest::AddConnection { config }).await? {
            IpcResponse::Connection(snapshot) => Ok(snapshot),
            other => unexpected(other),
        }
    }

    pub async fn remove_connection(&mut self, id: ConnectionId) -> Result<()> {
        self.expect_ok(IpcRequest::RemoveConnection { id }).await
    }

    pub async fn start(&mut self, id: ConnectionId) -> Result<()> {
        self.expect_ok(IpcRequest::Start { id }).await
    }

    pub async fn stop(&mut self, id: ConnectionId) -> Result<()> {
        self.expect_ok(IpcRequest::Stop { id }).await
    }

    pub async fn restart(&mut self, id: ConnectionId) -> Result<()> {
        self.expect_ok(IpcRequest::Restart { id }).await
    }

    pub async fn start_all(&mut self) -> Result<()> {
        self.expect_ok(IpcRequest::StartAll).await
    }

    pub async fn stop_all(&mut self) -> Result<()> {
        self.expect_ok(IpcRequest::StopAll).await
    }

    pub async fn kill_stuck(&mut self) -> Result<()> {
        self.expect_ok(IpcRequest::KillStuck).await
    }

    /// Returns how many processes were killed
    pub async fn free_port(&mut self, port: u16) -> Result<usize> {
        match self.send_request(IpcRequest::FreePort { port }).await? {
            IpcResponse::PortFreed { killed, .. } => Ok(killed),
            other => unexpected(other),
        }
    }

    pub async fn logs(&mut self, id: ConnectionId, limit: Option<usize>) -> Result<Vec<LogEntry>> {
        match self.send_request(IpcRequest::GetLogs { id, limit }).await? {
            IpcResponse::Logs { entries } => Ok(entries),
            other => unexpected(other),
        }
    }

    pub async fn clear_logs(&mut self, id: ConnectionId) -> Result<()> {
        self.expect_ok(IpcRequest::ClearLogs { id }).await
    }

    pub async fn namespaces(&mut self) -> Result<Vec<Namespace>> {
        match self.send_request(IpcRequest::ListNamespaces).await? {
            IpcResponse::Namespaces { namespaces } => Ok(namespaces),
            other => unexpected(other),
        }
    }

    pub async fn services(&mut self, namespace: &str) -> Result<Vec<Service>> {
        let request = IpcRequest::ListServices {
            namespace: namespace.to_string(),
        };
        match self.send_request(request).await? {
            IpcResponse::Services { services } => Ok(services),
            other => unexpected(other),
        }
    }

    /// Shutdown the orchestrator
    pub async fn shutdown(&mut self) -> Result<()> {
        self.expect_ok(IpcRequest::Shutdown).await
    }

    /// Look up a connection by UUID, unique UUID prefix or exact name
    pub async fn resolve(&mut self, query: &str) -> Result<ConnectionSnapshot> {
        let connections = self.list_connections().await?;
        resolve_connection(&connections, query).cloned()
    }

    async fn expect_ok(&mut self, request: IpcRequest) -> Result<()> {
        match self.send_request(request).await? {
            IpcResponse::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    /// Send a request and receive response (used by all public methods)
    async fn send_request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        self.connect().await?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;

        // Send request as JSON line
        let mut request_json = serde_json::to_string(&request)?;
        request_json.push('\n');
        stream.get_mut().write_all(request_json.as_bytes()).await?;

        // Read response line
        let mut response_line = String::new();
        let read = stream.read_line(&mut response_line).await?;
        if read == 0 {
            self.stream = None;
            anyhow::bail!("Orchestrator closed the connection");
        }

        let response: IpcResponse = serde_json::from_str(&response_line)
            .context("Failed to parse orchestrator response")?;
        Ok(response)
    }
}

fn unexpected<T>(response: IpcResponse) -> Result<T> {
    match response {
        IpcResponse::Error { message } => anyhow::bail!("{}", message),
        other => anyhow::bail!("Unexpected response: {:?}", other),
    }
}

/// Find one connection: exact UUID, then exact name, then unique UUID prefix
pub fn resolve_connection<'a>(
    connections: &'a [ConnectionSnapshot],
    query: &str,
) -> Result<&'a ConnectionSnapshot> {
    if let Some(found) = connections
        .iter()
        .find(|c| c.config.id.to_string().eq_ignore_ascii_case(query))
    {
        return Ok(found);
    }

    if let Some(found) = connections.iter().find(|c| c.config.name == query) {
        return Ok(found);
    }

    let query_lower = query.to_ascii_lowercase();
    let matches: Vec<_> = connections
        .iter()
        .filter(|c| !query.is_empty() && c.config.id.to_string().starts_with(&query_lower))
        .collect();

    match matches.as_slice() {
        [one] => Ok(*one),
        [] => anyhow::bail!("No connection matches '{}'", query),
        many => anyhow::bail!(
            "'{}' is ambiguous: matches {}",
            query,
            many.iter()
                .map(|c| c.config.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Parse `local:remote`, or a single port used for both
pub fn parse_port_mapping(value: &str) -> std::result::Result<(u16, u16), String> {
    let parse = |s: &str| {
        s.trim()
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| format!("invalid port '{}'", s))
    };

    match value.split_once(':') {
        Some((local, remote)) => Ok((parse(local)?, parse(remote)?)),
        None => {
            let port = parse(value)?;
            Ok((port, port))
        }
    }
}
