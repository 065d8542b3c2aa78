//! Registry of connected clients and broadcast fan-out.
//!
//! The registry has its own lock, independent of the occupancy state lock.
//! A broadcast write that fails or times out evicts that client: its entry
//! is removed and its close token cancelled, which stops its handler even if
//! the handler is blocked in a read. `unregister` is idempotent so the
//! handler's own exit path and an eviction can race harmlessly.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Write failures are logged and turned into evictions

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parking_protocol::Framing;

use super::connection::ConnectionError;

/// Process-local identity of a connection.
pub type ClientId = u64;

/// Type-erased write half of a client connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Writer handle shared between a connection's handler and the registry.
pub type ClientWriter = Arc<Mutex<BufWriter<BoxedWriter>>>;

/// Wraps any write half into a shareable [`ClientWriter`].
pub fn client_writer<W>(writer: W) -> ClientWriter
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    Arc::new(Mutex::new(BufWriter::new(Box::new(writer))))
}

/// Writes one framed message and flushes it, bounded by `limit`.
///
/// The limit covers waiting for the writer lock as well as the write.
pub async fn send_message(
    writer: &ClientWriter,
    framing: Framing,
    text: &str,
    limit: Duration,
) -> Result<(), ConnectionError> {
    let bytes = framing.encode(text);

    match timeout(limit, async {
        let mut writer = writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// A registered client.
struct ClientEntry {
    /// Remote address, for logging
    peer: String,

    /// Shared writer (also used by the client's own handler)
    writer: ClientWriter,

    /// Cancelled when the client must be disconnected
    closed: CancellationToken,
}

/// Live set of connected clients.
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientEntry>>,
    framing: Framing,
    write_timeout: Duration,
}

impl ClientRegistry {
    /// Creates an empty registry.
    ///
    /// # Arguments
    ///
    /// * `framing` - How broadcast messages are delimited
    /// * `write_timeout` - Upper bound for each broadcast write
    pub fn new(framing: Framing, write_timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            framing,
            write_timeout,
        }
    }

    /// Adds a client. Re-registering an id replaces the old entry.
    pub async fn register(
        &self,
        id: ClientId,
        peer: impl Into<String>,
        writer: ClientWriter,
        closed: CancellationToken,
    ) {
        let peer = peer.into();
        let mut clients = self.clients.write().await;
        clients.insert(
            id,
            ClientEntry {
                peer: peer.clone(),
                writer,
                closed,
            },
        );
        debug!(client_id = id, peer = %peer, clients = clients.len(), "Client registered");
    }

    /// Removes a client. Returns false if it was already gone.
    pub async fn unregister(&self, id: ClientId) -> bool {
        let mut clients = self.clients.write().await;
        match clients.remove(&id) {
            Some(entry) => {
                debug!(
                    client_id = id,
                    peer = %entry.peer,
                    clients = clients.len(),
                    "Client unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Sends `message` to every client except `exclude`.
    ///
    /// Recipients are copied out under the read lock and written to
    /// concurrently after it is released, so a slow client delays neither
    /// the other recipients nor registration. Clients whose write fails or
    /// times out are evicted silently; the caller only learns how many
    /// clients received the message.
    pub async fn broadcast(&self, message: &str, exclude: Option<ClientId>) -> usize {
        let recipients: Vec<(ClientId, String, ClientWriter)> = {
            let clients = self.clients.read().await;
            clients
                .iter()
                .filter(|(id, _)| Some(**id) != exclude)
                .map(|(id, entry)| (*id, entry.peer.clone(), Arc::clone(&entry.writer)))
                .collect()
        };

        if recipients.is_empty() {
            return 0;
        }

        let message: Arc<str> = Arc::from(message);
        let mut sends = JoinSet::new();
        for (id, peer, writer) in recipients {
            let message = Arc::clone(&message);
            let framing = self.framing;
            let limit = self.write_timeout;
            sends.spawn(async move {
                let result = send_message(&writer, framing, &message, limit).await;
                (id, peer, result)
            });
        }

        let mut delivered = 0;
        let mut failed = Vec::new();
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, _, Ok(()))) => delivered += 1,
                Ok((id, peer, Err(e))) => {
                    debug!(
                        client_id = id,
                        peer = %peer,
                        error = %e,
                        "Failed to deliver broadcast"
                    );
                    failed.push(id);
                }
                Err(e) => warn!(error = %e, "Broadcast send task failed"),
            }
        }

        if !failed.is_empty() {
            let mut clients = self.clients.write().await;
            for id in failed {
                if let Some(entry) = clients.remove(&id) {
                    entry.closed.cancel();
                    info!(client_id = id, peer = %entry.peer, "Evicted unreachable client");
                }
            }
        }

        delivered
    }

    /// Disconnects every client (used on shutdown).
    pub async fn close_all(&self) {
        let mut clients = self.clients.write().await;
        for (_, entry) in clients.drain() {
            entry.closed.cancel();
        }
    }

    /// Number of registered clients.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    pub async fn contains(&self, id: ClientId) -> bool {
        self.clients.read().await.contains_key(&id)
    }

    /// Framing used for messages sent through this registry.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn registry() -> ClientRegistry {
        ClientRegistry::new(Framing::Lines, TIMEOUT)
    }

    /// Registers a client backed by an in-memory pipe; returns the far end.
    async fn add_client(registry: &ClientRegistry, id: ClientId) -> (DuplexStream, CancellationToken) {
        let (ours, theirs) = duplex(1024);
        let token = CancellationToken::new();
        registry
            .register(id, format!("test-{id}"), client_writer(ours), token.clone())
            .await;
        (theirs, token)
    }

    async fn read_text(stream: &mut DuplexStream) -> String {
        let mut buf = vec![0u8; 256];
        let n = timeout(TIMEOUT, stream.read(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn test_broadcast_skips_excluded_client() {
        let registry = registry();
        let (mut a, _) = add_client(&registry, 1).await;
        let (mut b, _) = add_client(&registry, 2).await;
        let (mut c, _) = add_client(&registry, 3).await;

        let delivered = registry.broadcast("5:ABC123", Some(1)).await;

        assert_eq!(delivered, 2);
        assert_eq!(read_text(&mut b).await, "5:ABC123\n");
        assert_eq!(read_text(&mut c).await, "5:ABC123\n");

        let mut buf = [0u8; 16];
        let nothing = timeout(Duration::from_millis(50), a.read(&mut buf)).await;
        assert!(nothing.is_err(), "excluded client must not receive the notice");
    }

    #[tokio::test]
    async fn test_unregistered_client_receives_nothing() {
        let registry = registry();
        let (mut a, _) = add_client(&registry, 1).await;
        let (mut b, _) = add_client(&registry, 2).await;

        assert!(registry.unregister(2).await);
        let delivered = registry.broadcast("7:EXIT", None).await;

        assert_eq!(delivered, 1);
        assert_eq!(read_text(&mut a).await, "7:EXIT\n");
        // The registry no longer holds b's writer, so b sees EOF
        assert_eq!(read_text(&mut b).await, "");
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = registry();
        let _client = add_client(&registry, 9).await;

        assert!(registry.unregister(9).await);
        assert!(!registry.unregister(9).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_write_evicts_and_cancels() {
        let registry = registry();
        let (alive, _) = add_client(&registry, 1).await;
        let (dead, dead_token) = add_client(&registry, 2).await;
        drop(dead);

        let delivered = registry.broadcast("1:EXIT", None).await;

        assert_eq!(delivered, 1);
        assert!(registry.contains(1).await);
        assert!(!registry.contains(2).await);
        assert!(dead_token.is_cancelled());
        drop(alive);
    }

    /// Registers a client whose pipe holds a single byte and is never read.
    async fn add_stalled_client(
        registry: &ClientRegistry,
        id: ClientId,
    ) -> (DuplexStream, CancellationToken) {
        let (ours, theirs) = duplex(1);
        let token = CancellationToken::new();
        registry
            .register(id, format!("stalled-{id}"), client_writer(ours), token.clone())
            .await;
        (theirs, token)
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_timeout_evicts_stalled_client() {
        let registry = registry();
        let (mut healthy, healthy_token) = add_client(&registry, 1).await;
        let (_stalled, stalled_token) = add_stalled_client(&registry, 2).await;

        let delivered = registry.broadcast("5:ABC123:2024-11-25 14:30:45", None).await;

        assert_eq!(delivered, 1);
        assert_eq!(read_text(&mut healthy).await, "5:ABC123:2024-11-25 14:30:45\n");
        assert!(registry.contains(1).await);
        assert!(!healthy_token.is_cancelled());
        assert!(!registry.contains(2).await);
        assert!(stalled_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_register_not_blocked_by_stalled_broadcast() {
        let registry = Arc::new(ClientRegistry::new(Framing::Lines, Duration::from_secs(5)));
        let (_stalled, _) = add_stalled_client(&registry, 1).await;

        let sending = Arc::clone(&registry);
        let broadcast = tokio::spawn(async move {
            sending.broadcast("5:ABC123:2024-11-25 14:30:45", None).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (_late, _) = timeout(Duration::from_millis(500), add_client(&registry, 2))
            .await
            .expect("register waited for the broadcast");
        assert!(registry.contains(2).await);
        assert!(registry.unregister(2).await);

        // The broadcast is still waiting on the stalled client
        assert!(!broadcast.is_finished());
        broadcast.abort();
    }

    #[tokio::test]
    async fn test_slow_client_does_not_delay_others() {
        let registry = Arc::new(ClientRegistry::new(Framing::Lines, Duration::from_secs(5)));
        let (_stalled, _) = add_stalled_client(&registry, 1).await;
        let (mut healthy, _) = add_client(&registry, 2).await;

        let sending = Arc::clone(&registry);
        let broadcast = tokio::spawn(async move { sending.broadcast("9:EXIT", None).await });

        assert_eq!(read_text(&mut healthy).await, "9:EXIT\n");
        assert!(!broadcast.is_finished());
        broadcast.abort();
    }

    #[tokio::test]
    async fn test_close_all_cancels_every_client() {
        let registry = registry();
        let (_a, token_a) = add_client(&registry, 1).await;
        let (_b, token_b) = add_client(&registry, 2).await;

        registry.close_all().await;

        assert!(token_a.is_cancelled());
        assert!(token_b.is_cancelled());
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_raw_framing_sends_bare_text() {
        let registry = ClientRegistry::new(Framing::Raw, TIMEOUT);
        let (mut a, _) = add_client(&registry, 1).await;

        registry.broadcast("3:XYZ999", None).await;

        assert_eq!(read_text(&mut a).await, "3:XYZ999");
    }
}
