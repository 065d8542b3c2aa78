//! Spot entities and value objects.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::{DomainError, DomainResult, Plate};

/// Number of spots managed by one server instance.
pub const NUM_SPOTS: usize = 40;

// ============================================================================
// Spot Index
// ============================================================================

/// Zero-based index of a spot in the occupancy table.
///
/// Clients address spots by 1-based position ("1" .. "40"); the conversion
/// happens once in [`SpotIndex::from_position`] and `Display` renders the
/// 1-based position again, so log lines and broadcast notices match what
/// clients send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpotIndex(usize);

impl SpotIndex {
    /// Converts a 1-based wire position into an index.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidSpot` if `position` is outside `[1, NUM_SPOTS]`.
    pub fn from_position(position: i64) -> DomainResult<Self> {
        usize::try_from(position)
            .ok()
            .filter(|p| (1..=NUM_SPOTS).contains(p))
            .map(|p| Self(p - 1))
            .ok_or(DomainError::InvalidSpot {
                position,
                max: NUM_SPOTS,
            })
    }

    /// Zero-based index into the table.
    pub fn get(self) -> usize {
        self.0
    }

    /// One-based position as used on the wire.
    pub fn position(self) -> usize {
        self.0 + 1
    }

    /// Iterates over every valid index in table order.
    pub fn all() -> impl Iterator<Item = SpotIndex> {
        (0..NUM_SPOTS).map(Self)
    }
}

impl fmt::Display for SpotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.position(), f)
    }
}

// ============================================================================
// Occupant
// ============================================================================

/// The vehicle currently parked in a spot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupant {
    /// Plate of the parked vehicle
    pub plate: Plate,

    /// Client-supplied timestamp, passed through untouched
    pub timestamp: Option<String>,

    /// When the server applied the entry
    pub parked_at: DateTime<Utc>,
}

impl Occupant {
    /// Creates an occupant stamped with the current time.
    pub fn new(plate: Plate, timestamp: Option<String>) -> Self {
        Self {
            plate,
            timestamp,
            parked_at: Utc::now(),
        }
    }
}

// ============================================================================
// Spot
// ============================================================================

/// A single parking spot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Spot {
    #[default]
    Empty,
    Occupied(Occupant),
}

impl Spot {
    #[must_use]
    pub fn is_occupied(&self) -> bool {
        matches!(self, Spot::Occupied(_))
    }

    /// Returns the occupant, if any.
    pub fn occupant(&self) -> Option<&Occupant> {
        match self {
            Spot::Empty => None,
            Spot::Occupied(occupant) => Some(occupant),
        }
    }

    /// Returns true if the spot is held by exactly this plate.
    pub fn holds(&self, plate: &Plate) -> bool {
        self.occupant().is_some_and(|o| &o.plate == plate)
    }
}
