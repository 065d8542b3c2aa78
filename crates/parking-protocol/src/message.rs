//! Protocol message types for parking clients.

use std::fmt;

use parking_core::{DomainError, Plate, SpotIndex, Transition};

use crate::parse::RequestError;

/// Marker used in place of a plate when a spot is freed.
pub const EXIT_MARKER: &str = "EXIT";

/// A decoded and validated entry/exit report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Target spot (ignored when the plate is already parked)
    pub spot: SpotIndex,

    /// Plate of the reporting vehicle
    pub plate: Plate,

    /// Opaque client timestamp, if one was sent
    pub timestamp: Option<String>,
}

// ============================================================================
// Responses (requester only)
// ============================================================================

/// Reply sent to the client that issued a request.
///
/// The texts are fixed; existing gate terminals match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Entry accepted
    Parked,
    /// Exit accepted
    Exited,
    /// No `:` separator in the payload
    MalformedMessage,
    /// Plate failed the `AAA000` check
    InvalidPlate,
    /// Spot outside `1..=40`
    InvalidSpot,
    /// Target spot taken by another plate
    SpotOccupied,
}

impl Response {
    /// Wire text of the response.
    pub const fn as_str(self) -> &'static str {
        match self {
            Response::Parked => "OK: Vehiculo estacionado",
            Response::Exited => "OK: Vehiculo salio. Plaza liberada",
            Response::MalformedMessage => "ERROR: Formato invalido. Use PUESTO:PLACA:TIMESTAMP",
            Response::InvalidPlate => "ERROR: Placa invalida. Formato: AAA000",
            Response::InvalidSpot => "ERROR: Puesto invalido. Use 1, 2, 3 ... 40",
            Response::SpotOccupied => "ERROR: Plaza ya ocupada",
        }
    }

    /// Returns true for accepted requests.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Response::Parked | Response::Exited)
    }

    /// Response for a successful table transition.
    pub fn for_transition(transition: &Transition) -> Self {
        match transition {
            Transition::Entered { .. } => Response::Parked,
            Transition::Exited { .. } => Response::Exited,
        }
    }
}

impl From<&RequestError> for Response {
    fn from(err: &RequestError) -> Self {
        match err {
            RequestError::Malformed { .. } => Response::MalformedMessage,
            RequestError::InvalidPlate { .. } => Response::InvalidPlate,
            RequestError::InvalidSpot { .. } => Response::InvalidSpot,
        }
    }
}

impl From<&DomainError> for Response {
    fn from(err: &DomainError) -> Self {
        match err {
            DomainError::InvalidPlate { .. } => Response::InvalidPlate,
            DomainError::InvalidSpot { .. } => Response::InvalidSpot,
            DomainError::SpotOccupied { .. } => Response::SpotOccupied,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Notices (broadcast to every other client)
// ============================================================================

/// State change announced to every client except the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// `<spot>:<plate>[:<timestamp>]`
    Entered {
        spot: SpotIndex,
        plate: Plate,
        timestamp: Option<String>,
    },

    /// `<spot>:EXIT`
    Exited { spot: SpotIndex },
}

impl Notice {
    /// Builds the notice for a table transition.
    pub fn for_transition(transition: &Transition) -> Self {
        match transition {
            Transition::Entered {
                spot,
                plate,
                timestamp,
            } => Notice::Entered {
                spot: *spot,
                plate: plate.clone(),
                timestamp: timestamp.clone(),
            },
            Transition::Exited { spot, .. } => Notice::Exited { spot: *spot },
        }
    }

    pub fn spot(&self) -> SpotIndex {
        match self {
            Notice::Entered { spot, .. } | Notice::Exited { spot } => *spot,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Entered {
                spot,
                plate,
                timestamp: Some(ts),
            } => write!(f, "{spot}:{plate}:{ts}"),
            Notice::Entered {
                spot,
                plate,
                timestamp: None,
            } => write!(f, "{spot}:{plate}"),
            Notice::Exited { spot } => write!(f, "{spot}:{EXIT_MARKER}"),
        }
    }
}
