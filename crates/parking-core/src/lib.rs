//! Parking Core - Domain types for the parking occupancy server
//!
//! This crate provides the domain model shared between the wire protocol
//! (`parking-protocol`) and the daemon (`parkd`): plates, spot indices,
//! occupants and the fixed-size occupancy table.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod plate;
pub mod spot;
pub mod table;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use plate::{Plate, PLATE_LEN};
pub use spot::{Occupant, Spot, SpotIndex, NUM_SPOTS};
pub use table::{OccupancySnapshot, OccupancyTable, OccupiedSpot, Transition};
