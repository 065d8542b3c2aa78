//! Parking Protocol - Text wire protocol for the parking server
//!
//! This crate provides request parsing, the response/notice vocabulary and
//! outbound framing for communication between parking clients (gate
//! terminals, dashboards) and the daemon.

pub mod framing;
pub mod message;
pub mod parse;

pub use framing::{Framing, FramingParseError, MAX_PAYLOAD_SIZE};
pub use message::{Notice, Request, Response, EXIT_MARKER};
pub use parse::{parse_request, RequestError};
