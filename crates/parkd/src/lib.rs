//! Parking Daemon - Occupancy service and broadcast server
//!
//! This crate provides the core infrastructure for the parking daemon:
//! - `service` - Occupancy table behind the state lock
//! - `server` - TCP acceptor, per-client handlers and the client registry
//! - `config` - Layered server configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        parkd daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  ParkingServer  │────▶│     OccupancyService        │   │
//! │  │ (TcpListener)   │     │  (table + state lock)       │   │
//! │  └────────┬────────┘     └─────────────────────────────┘   │
//! │           │                                                 │
//! │           │ connections                                     │
//! │           ▼                                                 │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionHandler│────▶│   ClientRegistry            │   │
//! │  │  (per client)   │     │   (fan-out + eviction)      │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The state lock and the registry lock are never held together: a
//! handler applies its request, releases the state lock, answers the
//! requester, and only then broadcasts.
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Connection failures end that connection only

pub mod config;
pub mod server;
pub mod service;
