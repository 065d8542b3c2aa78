//! TCP server for the parking daemon.
//!
//! The server:
//! - Listens on a TCP port for client connections
//! - Registers each client and spawns a ConnectionHandler for it
//! - Tracks every handler task so shutdown can drain them
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  ParkingServer  │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ConnectionHandler│────▶│ OccupancyService │
//! │   (per client)  │     │   (state lock)   │
//! └───────┬─────────┘     └──────────────────┘
//!         │
//!         │ broadcast (after the state lock is released)
//!         ▼
//! ┌─────────────────┐
//! │ ClientRegistry  │
//! │ (registry lock) │
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and allow continued operation

mod clients;
mod connection;

pub use clients::{client_writer, send_message, BoxedWriter, ClientId, ClientRegistry, ClientWriter};
pub use connection::{ConnectionError, ConnectionHandler, DisconnectReason};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::service::OccupancyService;

/// TCP server for the parking daemon.
///
/// Owns the listener, the shared occupancy service and the client registry.
pub struct ParkingServer {
    /// Bound listener
    listener: TcpListener,

    /// Address actually bound (resolves port 0)
    local_addr: SocketAddr,

    /// Runtime settings
    config: ServerConfig,

    /// Shared occupancy state
    service: Arc<OccupancyService>,

    /// Connected clients
    clients: Arc<ClientRegistry>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Handles of every spawned connection handler
    tracker: TaskTracker,

    /// Connection counter for generating client IDs
    connection_counter: AtomicU64,
}

impl ParkingServer {
    /// Binds the listener.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the address cannot be bound.
    pub async fn bind(
        config: ServerConfig,
        service: Arc<OccupancyService>,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;

        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            addr,
            error: e.to_string(),
        })?;

        let clients = Arc::new(ClientRegistry::new(config.framing, config.write_timeout()));

        Ok(Self {
            listener,
            local_addr,
            config,
            service,
            clients,
            cancel_token,
            tracker: TaskTracker::new(),
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the shared occupancy service.
    pub fn service(&self) -> Arc<OccupancyService> {
        Arc::clone(&self.service)
    }

    /// Returns the client registry.
    pub fn clients(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.clients)
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered, then
    /// drains the connection handlers. Does not return until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        info!(
            addr = %self.local_addr,
            framing = %self.config.framing,
            spots = self.service.total_spots(),
            "Parking server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let id = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, peer, id).await;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Registers a new client and spawns its handler.
    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr, id: ClientId) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(client_id = id, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let writer = client_writer(writer);
        let closed = self.cancel_token.child_token();

        self.clients
            .register(id, peer.to_string(), Arc::clone(&writer), closed.clone())
            .await;

        info!(client_id = id, peer = %peer, "Client connected");

        let handler = ConnectionHandler::new(
            reader,
            writer,
            id,
            Arc::clone(&self.service),
            Arc::clone(&self.clients),
            closed,
        )
        .with_idle_timeout(self.config.idle_timeout());

        self.tracker.spawn(handler.run());
    }

    /// Stops all handlers and waits for them, bounded by the grace period.
    async fn shutdown(&self) {
        self.clients.close_all().await;
        self.tracker.close();

        let grace = self.config.shutdown_grace();
        if timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                remaining = self.tracker.len(),
                grace_ms = grace.as_millis() as u64,
                "Connection handlers did not finish within grace period"
            );
        }

        let snapshot = self.service.snapshot();
        info!(
            occupied = snapshot.occupied_count(),
            free = snapshot.free_count(),
            "Server shutdown complete"
        );
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },
}
