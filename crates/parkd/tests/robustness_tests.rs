//! Robustness tests for the parking server.
//!
//! These tests verify the server handles edge cases and error conditions gracefully:
//! - Malformed and oversized messages
//! - Rapid connect/disconnect
//! - Concurrent reports from many clients
//! - Idle timeouts
//! - Graceful shutdown with connected clients
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::sync::Arc;
use std::time::Duration;

use parkd::config::ServerConfig;
use parkd::server::{ClientRegistry, ParkingServer};
use parkd::service::OccupancyService;
use parking_core::NUM_SPOTS;
use parking_protocol::{Framing, MAX_PAYLOAD_SIZE};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

const PARKED: &str = "OK: Vehiculo estacionado";
const MALFORMED: &str = "ERROR: Formato invalido. Use PUESTO:PLACA:TIMESTAMP";
const BAD_PLATE: &str = "ERROR: Placa invalida. Formato: AAA000";
const OCCUPIED: &str = "ERROR: Plaza ya ocupada";

// ============================================================================
// Test Helpers
// ============================================================================

struct TestServer {
    addr: std::net::SocketAddr,
    service: Arc<OccupancyService>,
    clients: Arc<ClientRegistry>,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(ServerConfig::default()).await
    }

    async fn spawn_with(config: ServerConfig) -> Self {
        let config = ServerConfig {
            bind: "127.0.0.1".parse().unwrap(),
            port: 0,
            framing: Framing::Lines,
            shutdown_grace_ms: 500,
            ..config
        };
        let cancel_token = CancellationToken::new();

        let server = ParkingServer::bind(
            config,
            Arc::new(OccupancyService::new()),
            cancel_token.clone(),
        )
        .await
        .expect("bind test server");

        let addr = server.local_addr();
        let service = server.service();
        let clients = server.clients();

        let handle = tokio::spawn(async move {
            let _ = server.run().await;
        });

        TestServer {
            addr,
            service,
            clients,
            cancel_token,
            handle,
        }
    }

    async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    async fn wait_for_clients(&self, expected: usize) {
        let start = tokio::time::Instant::now();
        while start.elapsed() < RECV_TIMEOUT {
            if self.clients.len().await == expected {
                return;
            }
            sleep(POLL_INTERVAL).await;
        }
        panic!(
            "Expected {expected} clients, found {}",
            self.clients.len().await
        );
    }
}

struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn request(&mut self, msg: &str) -> String {
        self.send_raw(format!("{msg}\n").as_bytes()).await;
        self.recv().await.expect("connection closed before reply")
    }

    /// Sends a request and returns its reply, skipping notices broadcast
    /// by other clients in the meantime.
    async fn request_ignoring_notices(&mut self, msg: &str) -> String {
        self.send_raw(format!("{msg}\n").as_bytes()).await;
        loop {
            let line = self.recv().await.expect("connection closed before reply");
            if line.starts_with("OK:") || line.starts_with("ERROR:") {
                return line;
            }
        }
    }

    /// Receives one line; None means the server closed the connection.
    async fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for message")
            .unwrap_or(0);
        (n > 0).then(|| line.trim_end_matches('\n').to_string())
    }
}

// ============================================================================
// Malformed Message Tests
// ============================================================================

#[tokio::test]
async fn test_malformed_messages_recoverable() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    for bad in ["", "   ", "no-separator", "ABC123", "\u{00e9}\u{00e8}"] {
        assert_eq!(client.request(bad).await, MALFORMED, "payload {bad:?}");
    }

    // Separator present but plate missing or wrong
    assert_eq!(client.request("5:").await, BAD_PLATE);
    assert_eq!(client.request(":").await, BAD_PLATE);
    assert_eq!(client.request("5:abc-12").await, BAD_PLATE);

    assert_eq!(client.request("5:VALID1").await, BAD_PLATE);
    assert_eq!(client.request("5:VAL001").await, PARKED);

    server.cancel_token.cancel();
}

#[tokio::test]
async fn test_crlf_terminated_request() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send_raw(b"6:CRL001\r\n").await;
    assert_eq!(client.recv().await.as_deref(), Some(PARKED));

    let occupant = server
        .service
        .snapshot()
        .occupied
        .into_iter()
        .find(|o| o.plate.as_str() == "CRL001")
        .expect("CRL001 parked");
    assert_eq!(occupant.spot.position(), 6);
    assert_eq!(occupant.timestamp, None);

    server.cancel_token.cancel();
}

#[tokio::test]
async fn test_oversized_line_disconnects_only_sender() {
    let server = TestServer::spawn().await;
    let mut bystander = server.connect().await;
    assert_eq!(bystander.request("1:BYS001").await, PARKED);

    let mut offender = server.connect().await;
    let huge = vec![b'A'; MAX_PAYLOAD_SIZE * 2];
    offender.send_raw(&huge).await;
    assert_eq!(offender.recv().await, None);

    // Nobody else is affected
    assert_eq!(bystander.request("2:BYS002").await, PARKED);
    server.wait_for_clients(1).await;

    server.cancel_token.cancel();
}

#[tokio::test]
async fn test_line_at_limit_accepted() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    // Timestamp padding brings the line (newline included) to the limit
    let prefix = "3:LIM003:";
    let padding = "t".repeat(MAX_PAYLOAD_SIZE - prefix.len() - 1);
    assert_eq!(client.request(&format!("{prefix}{padding}")).await, PARKED);

    server.cancel_token.cancel();
}

// ============================================================================
// Connection Churn Tests
// ============================================================================

#[tokio::test]
async fn test_rapid_connect_disconnect() {
    let server = TestServer::spawn().await;

    for _ in 0..50 {
        let stream = TcpStream::connect(server.addr).await.unwrap();
        drop(stream);
    }

    server.wait_for_clients(0).await;

    // Server still serves requests
    let mut client = server.connect().await;
    assert_eq!(client.request("4:CHR004").await, PARKED);

    server.cancel_token.cancel();
}

#[tokio::test]
async fn test_disconnect_mid_broadcast_does_not_affect_others() {
    let server = TestServer::spawn().await;
    let mut reporter = server.connect().await;
    let mut watcher = server.connect().await;
    assert_eq!(watcher.request("ping").await, MALFORMED);

    let leaver = server.connect().await;
    drop(leaver);

    for position in 1..=5 {
        let msg = format!("{position}:MID00{position}");
        assert_eq!(reporter.request(&msg).await, PARKED);
        assert_eq!(watcher.recv().await, Some(msg));
    }

    server.cancel_token.cancel();
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients_distinct_spots() {
    let server = TestServer::spawn().await;

    let mut tasks = Vec::new();
    for position in 1..=NUM_SPOTS {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut client = TestClient::new(stream);
            client
                .request_ignoring_notices(&format!("{position}:CON{position:03}"))
                .await
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), PARKED);
    }

    assert_eq!(server.service.occupied_count(), NUM_SPOTS);
    assert_eq!(server.service.free_count(), 0);

    server.cancel_token.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clients_same_spot() {
    let server = TestServer::spawn().await;

    let mut tasks = Vec::new();
    for i in 0..10 {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut client = TestClient::new(stream);
            client
                .request_ignoring_notices(&format!("17:RAC{i:03}"))
                .await
        }));
    }

    let mut replies = Vec::new();
    for task in tasks {
        replies.push(task.await.unwrap());
    }

    assert_eq!(replies.iter().filter(|r| r.as_str() == PARKED).count(), 1);
    assert_eq!(replies.iter().filter(|r| r.as_str() == OCCUPIED).count(), 9);
    assert_eq!(server.service.occupied_count(), 1);

    server.cancel_token.cancel();
}

// ============================================================================
// Timeout and Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_idle_client_disconnected() {
    let server = TestServer::spawn_with(ServerConfig {
        idle_timeout_secs: Some(1),
        ..ServerConfig::default()
    })
    .await;

    let mut client = server.connect().await;
    assert_eq!(client.request("ping").await, MALFORMED);

    let closed = timeout(Duration::from_secs(3), async {
        let mut line = String::new();
        client.reader.read_line(&mut line).await.unwrap_or(0)
    })
    .await
    .expect("idle client was not disconnected");
    assert_eq!(closed, 0);

    server.wait_for_clients(0).await;
    server.cancel_token.cancel();
}

#[tokio::test]
async fn test_shutdown_closes_clients_and_stops_server() {
    let server = TestServer::spawn().await;
    let mut a = server.connect().await;
    let mut b = server.connect().await;
    assert_eq!(a.request("1:SHU001").await, PARKED);
    assert_eq!(b.recv().await.as_deref(), Some("1:SHU001"));

    server.cancel_token.cancel();

    assert_eq!(a.recv().await, None);
    assert_eq!(b.recv().await, None);

    timeout(RECV_TIMEOUT, server.handle)
        .await
        .expect("server did not stop")
        .unwrap();

    assert!(server.clients.is_empty().await);
    assert!(TcpStream::connect(server.addr).await.is_err());
}
