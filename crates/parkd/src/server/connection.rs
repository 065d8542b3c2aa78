//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Reads payloads according to the configured framing
//! - Decodes them into requests
//! - Applies requests to the occupancy service
//! - Answers the requester and broadcasts notices to everyone else
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parking_protocol::{parse_request, Framing, Response, MAX_PAYLOAD_SIZE};

use super::clients::{send_message, ClientId, ClientRegistry, ClientWriter};
use crate::service::{OccupancyService, Outcome};

/// Why a connection handler stopped.
#[derive(Debug)]
pub enum DisconnectReason {
    /// The client closed its side (zero-length read).
    PeerClosed,

    /// The close token fired: evicted after a failed broadcast, or shutdown.
    Closed,

    /// No payload arrived within the idle timeout.
    IdleTimeout,

    /// Transport failure.
    Error(ConnectionError),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed connection"),
            Self::Closed => write!(f, "closed by server"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::Error(e) => write!(f, "{e}"),
        }
    }
}

/// Connection handler for a single client.
///
/// Manages the lifecycle of a client connection:
/// `Connected → (Reading ⇄ Processing) → Disconnected`.
pub struct ConnectionHandler<R> {
    /// Buffered reader for incoming payloads
    reader: BufReader<R>,

    /// Writer shared with the client registry
    writer: ClientWriter,

    /// Identity used for broadcast exclusion and unregistration
    client_id: ClientId,

    /// Shared occupancy state
    service: Arc<OccupancyService>,

    /// Connected clients, for broadcasting
    clients: Arc<ClientRegistry>,

    /// Cancelled to force this connection closed
    closed: CancellationToken,

    /// Close the connection after this long without a payload
    idle_timeout: Option<Duration>,
}

impl<R> ConnectionHandler<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `reader` - Read half of the connection
    /// * `writer` - Write half, already registered in `clients`
    /// * `client_id` - Identity the connection was registered under
    /// * `service` - Shared occupancy service
    /// * `clients` - Registry used for broadcasting and unregistration
    /// * `closed` - Token that forces the handler to stop
    pub fn new(
        reader: R,
        writer: ClientWriter,
        client_id: ClientId,
        service: Arc<OccupancyService>,
        clients: Arc<ClientRegistry>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            // Capacity equal to the payload limit means a raw-mode read
            // bypasses the buffer and maps to exactly one socket read.
            reader: BufReader::with_capacity(MAX_PAYLOAD_SIZE, reader),
            writer,
            client_id,
            service,
            clients,
            closed,
            idle_timeout: None,
        }
    }

    /// Sets the idle timeout (None disables it).
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Runs the connection handler.
    ///
    /// Processes payloads until the connection ends, then unregisters the
    /// client. Returns why the connection ended.
    pub async fn run(mut self) -> DisconnectReason {
        debug!(client_id = self.client_id, "Connection handler started");

        let reason = self.process_messages().await;

        // May already be gone if a broadcast evicted us
        self.clients.unregister(self.client_id).await;

        match &reason {
            DisconnectReason::Error(e) => {
                warn!(client_id = self.client_id, error = %e, "Client disconnected with error");
            }
            other => {
                info!(client_id = self.client_id, reason = %other, "Client disconnected");
            }
        }

        reason
    }

    /// Main message processing loop.
    async fn process_messages(&mut self) -> DisconnectReason {
        let closed = self.closed.clone();

        loop {
            let read = tokio::select! {
                _ = closed.cancelled() => return DisconnectReason::Closed,
                result = self.next_payload() => result,
            };

            let payload = match read {
                Ok(payload) => payload,
                Err(ConnectionError::Eof) => return DisconnectReason::PeerClosed,
                Err(ConnectionError::IdleTimeout) => return DisconnectReason::IdleTimeout,
                Err(e) => return DisconnectReason::Error(e),
            };

            if let Err(e) = self.handle_payload(&payload).await {
                return DisconnectReason::Error(e);
            }
        }
    }

    /// Handles one payload: exactly one response to the requester, then
    /// the broadcast if state changed.
    async fn handle_payload(&mut self, payload: &str) -> Result<(), ConnectionError> {
        debug!(
            client_id = self.client_id,
            payload = %payload.trim_end(),
            "Received message"
        );

        let outcome = self.process(payload);

        let reply = send_message(
            &self.writer,
            self.clients.framing(),
            outcome.response.as_str(),
            self.clients.write_timeout(),
        )
        .await;

        debug!(
            client_id = self.client_id,
            accepted = outcome.response.is_ok(),
            response = %outcome.response,
            "Replied"
        );

        // State already changed, so others hear about it even if our
        // own reply could not be written.
        if let Some(notice) = outcome.notice {
            let delivered = self
                .clients
                .broadcast(&notice.to_string(), Some(self.client_id))
                .await;
            debug!(
                client_id = self.client_id,
                spot = %notice.spot(),
                notice = %notice,
                delivered,
                "Broadcast notice"
            );
        }

        reply
    }

    /// Decodes and applies a payload. Decode errors never reach the service.
    fn process(&self, payload: &str) -> Outcome {
        match parse_request(payload) {
            Ok(request) => self.service.apply(request),
            Err(e) => {
                debug!(client_id = self.client_id, error = %e, "Rejected payload");
                Outcome::reply_only(Response::from(&e))
            }
        }
    }

    /// Reads the next payload, honouring the idle timeout.
    async fn next_payload(&mut self) -> Result<String, ConnectionError> {
        match self.idle_timeout {
            Some(limit) => timeout(limit, self.read_payload())
                .await
                .map_err(|_| ConnectionError::IdleTimeout)?,
            None => self.read_payload().await,
        }
    }

    /// Reads a single payload from the client.
    async fn read_payload(&mut self) -> Result<String, ConnectionError> {
        match self.clients.framing() {
            Framing::Raw => {
                let mut buf = vec![0u8; MAX_PAYLOAD_SIZE];
                let n = self
                    .reader
                    .read(&mut buf)
                    .await
                    .map_err(|e| ConnectionError::Io(e.to_string()))?;

                if n == 0 {
                    return Err(ConnectionError::Eof);
                }

                Ok(String::from_utf8_lossy(buf.get(..n).unwrap_or_default()).into_owned())
            }
            Framing::Lines => {
                let mut line = Vec::new();
                let n = (&mut self.reader)
                    .take(MAX_PAYLOAD_SIZE as u64 + 1)
                    .read_until(b'\n', &mut line)
                    .await
                    .map_err(|e| ConnectionError::Io(e.to_string()))?;

                if n == 0 {
                    return Err(ConnectionError::Eof);
                }

                if !line.ends_with(b"\n") && line.len() > MAX_PAYLOAD_SIZE {
                    return Err(ConnectionError::MessageTooLarge {
                        size: line.len(),
                        max: MAX_PAYLOAD_SIZE,
                    });
                }

                Ok(String::from_utf8_lossy(&line).into_owned())
            }
        }
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Idle timeout")]
    IdleTimeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}
