//! IPC integration tests
//!
//! Run the IPC server on an ephemeral port and talk to it the way the CLI
//! does: one JSON request per line, one JSON response per line.

#![cfg(unix)]

mod common;

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use kf_core::ipc::{IpcRequest, IpcResponse};
use kf_core::{ConnectionConfig, ConnectionId, ConnectionStatus};
use kf_orchestrator::ipc::IpcServer;

use common::{open_port, wait_until, Harness};

/// IPC test client wrapper
struct TestClient {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: BufWriter<tokio::net::tcp::OwnedWriteHalf>,
}

impl TestClient {
    async fn connect(address: &str) -> Self {
        let stream = TcpStream::connect(address)
            .await
            .expect("Failed to connect to IPC server");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        }
    }

    async fn send_raw(&mut self, line: &str) -> IpcResponse {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();

        let mut response_line = String::new();
        self.reader.read_line(&mut response_line).await.unwrap();
        assert!(!response_line.is_empty(), "Server closed the connection");

        serde_json::from_str(&response_line).expect("Failed to parse response")
    }

    async fn send_request(&mut self, request: IpcRequest) -> IpcResponse {
        let line = serde_json::to_string(&request).unwrap();
        self.send_raw(&line).await
    }
}

struct Running {
    harness: Harness,
    address: String,
    token: CancellationToken,
    server: JoinHandle<anyhow::Result<()>>,
}

async fn start_server() -> Running {
    let harness = Harness::new().await;
    let (listener, port) = open_port().await;
    let address = format!("127.0.0.1:{}", port);

    let token = CancellationToken::new();
    let server = IpcServer::new(address.clone(), harness.manager.clone())
        .with_shutdown_token(token.clone());
    let server = tokio::spawn(async move { server.serve(listener).await });

    Running {
        harness,
        address,
        token,
        server,
    }
}

#[tokio::test]
async fn test_ipc_ping_pong() {
    let running = start_server().await;
    let mut client = TestClient::connect(&running.address).await;

    let response = client.send_request(IpcRequest::Ping).await;
    assert!(matches!(response, IpcResponse::Pong));

    // Several requests on one connection
    let response = client.send_request(IpcRequest::Ping).await;
    assert!(matches!(response, IpcResponse::Pong));

    running.token.cancel();
}

#[tokio::test]
async fn test_ipc_get_status() {
    let running = start_server().await;
    running.harness.add("api", 18090, None).await;
    let mut client = TestClient::connect(&running.address).await;

    match client.send_request(IpcRequest::GetStatus).await {
        IpcResponse::Status(status) => {
            assert!(status.running);
            assert_eq!(status.pid, std::process::id());
            assert_eq!(status.connection_count, 1);
            assert_eq!(status.connected_count, 0);
            assert!(!status.monitoring);
            assert!(status.kubectl_path.is_some());
        }
        other => panic!("Unexpected response: {:?}", other),
    }

    running.token.cancel();
}

#[tokio::test]
async fn test_ipc_connection_lifecycle() {
    let running = start_server().await;
    let (_listener, port) = open_port().await;
    let mut client = TestClient::connect(&running.address).await;

    let config = ConnectionConfig::new("api", "default", "api", port, 80);
    let id = config.id;

    match client
        .send_request(IpcRequest::AddConnection { config })
        .await
    {
        IpcResponse::Connection(snapshot) => {
            assert_eq!(snapshot.config.id, id);
            assert_eq!(snapshot.forward_status, ConnectionStatus::Disconnected);
        }
        other => panic!("Unexpected response: {:?}", other),
    }

    match client.send_request(IpcRequest::ListConnections).await {
        IpcResponse::Connections { connections } => {
            assert_eq!(connections.len(), 1);
            assert_eq!(connections[0].config.name, "api");
        }
        other => panic!("Unexpected response: {:?}", other),
    }

    let response = client.send_request(IpcRequest::Start { id }).await;
    assert!(matches!(response, IpcResponse::Ok));

    let manager = running.harness.manager.clone();
    assert!(
        wait_until(Duration::from_secs(3), || {
            manager.status(id).map(|(fwd, _)| fwd) == Some(ConnectionStatus::Connected)
        })
        .await
    );

    match client
        .send_request(IpcRequest::GetLogs { id, limit: Some(1) })
        .await
    {
        IpcResponse::Logs { entries } => assert_eq!(entries.len(), 1),
        other => panic!("Unexpected response: {:?}", other),
    }

    let response = client.send_request(IpcRequest::ClearLogs { id }).await;
    assert!(matches!(response, IpcResponse::Ok));

    let response = client.send_request(IpcRequest::Stop { id }).await;
    assert!(matches!(response, IpcResponse::Ok));
    match client.send_request(IpcRequest::GetConnection { id }).await {
        IpcResponse::Connection(snapshot) => {
            assert_eq!(snapshot.overall_status(), ConnectionStatus::Disconnected);
        }
        other => panic!("Unexpected response: {:?}", other),
    }

    let response = client.send_request(IpcRequest::RemoveConnection { id }).await;
    assert!(matches!(response, IpcResponse::Ok));
    assert!(running.harness.manager.snapshots().is_empty());

    running.token.cancel();
}

#[tokio::test]
async fn test_ipc_free_port_with_no_listener() {
    let running = start_server().await;
    let port = common::closed_port().await;
    let mut client = TestClient::connect(&running.address).await;

    match client.send_request(IpcRequest::FreePort { port }).await {
        IpcResponse::PortFreed { port: freed, killed } => {
            assert_eq!(freed, port);
            assert_eq!(killed, 0);
        }
        IpcResponse::Error { message } => assert!(message.contains("lsof not found")),
        other => panic!("Unexpected response: {:?}", other),
    }

    running.token.cancel();
}

#[tokio::test]
async fn test_ipc_unknown_connection_is_error() {
    let running = start_server().await;
    let mut client = TestClient::connect(&running.address).await;
    let id = ConnectionId::new();

    for request in [
        IpcRequest::GetConnection { id },
        IpcRequest::Start { id },
        IpcRequest::Stop { id },
        IpcRequest::RemoveConnection { id },
    ] {
        match client.send_request(request).await {
            IpcResponse::Error { message } => assert!(message.contains("not found")),
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    running.token.cancel();
}

#[tokio::test]
async fn test_ipc_invalid_request() {
    let running = start_server().await;
    let mut client = TestClient::connect(&running.address).await;

    match client.send_raw("{\"type\":\"not_a_request\"}").await {
        IpcResponse::Error { message } => assert!(message.starts_with("Invalid request")),
        other => panic!("Unexpected response: {:?}", other),
    }

    // The connection stays usable
    let response = client.send_request(IpcRequest::Ping).await;
    assert!(matches!(response, IpcResponse::Pong));

    running.token.cancel();
}

#[tokio::test]
async fn test_ipc_discovery() {
    let running = start_server().await;
    let mut client = TestClient::connect(&running.address).await;

    match client.send_request(IpcRequest::ListNamespaces).await {
        IpcResponse::Namespaces { namespaces } => {
            let names: Vec<_> = namespaces.into_iter().map(|n| n.name).collect();
            assert_eq!(names, vec!["default", "staging"]);
        }
        other => panic!("Unexpected response: {:?}", other),
    }

    match client
        .send_request(IpcRequest::ListServices {
            namespace: "default".to_string(),
        })
        .await
    {
        IpcResponse::Services { services } => {
            assert_eq!(services.len(), 1);
            assert_eq!(services[0].ports[0].display_name(), "80 (http)");
        }
        other => panic!("Unexpected response: {:?}", other),
    }

    let response = client
        .send_request(IpcRequest::ListServices {
            namespace: "missing".to_string(),
        })
        .await;
    assert!(matches!(response, IpcResponse::Error { .. }));

    running.token.cancel();
}

#[tokio::test]
async fn test_ipc_shutdown_stops_server() {
    let running = start_server().await;
    let mut client = TestClient::connect(&running.address).await;

    let response = client.send_request(IpcRequest::Shutdown).await;
    assert!(matches!(response, IpcResponse::Ok));
    assert!(running.token.is_cancelled());

    let result = timeout(Duration::from_secs(2), running.server)
        .await
        .expect("Server did not stop after shutdown");
    assert!(result.unwrap().is_ok());
}
