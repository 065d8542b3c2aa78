//! Outbound framing and payload limits.
//!
//! The gate terminals in the field send one message per `send()` with no
//! delimiter and expect replies the same way (`Framing::Raw`). Newer clients
//! can opt into newline-delimited messages (`Framing::Lines`), which survive
//! TCP coalescing and fragmentation.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// Largest accepted inbound payload in bytes.
pub const MAX_PAYLOAD_SIZE: usize = 1024;

/// How messages are delimited on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// One read is one message; replies carry no terminator.
    #[default]
    Raw,
    /// Messages are terminated by `\n` in both directions.
    Lines,
}

impl Framing {
    /// Encodes one outbound message.
    pub fn encode(self, text: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        if self == Framing::Lines {
            bytes.push(b'\n');
        }
        bytes
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Raw => write!(f, "raw"),
            Framing::Lines => write!(f, "lines"),
        }
    }
}

/// Unknown framing name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown framing {0:?} (expected \"raw\" or \"lines\")")]
pub struct FramingParseError(pub String);

impl FromStr for Framing {
    type Err = FramingParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Framing::Raw),
            "lines" | "line" => Ok(Framing::Lines),
            other => Err(FramingParseError(other.to_string())),
        }
    }
}
