//! Domain-specific error types following panic-free policy.

use crate::{Plate, SpotIndex};
use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Plate does not match the `AAA000` shape
    #[error("Invalid plate: {value:?} (expected 3 letters followed by 3 digits)")]
    InvalidPlate { value: String },

    /// Spot position outside `[1, N]`
    #[error("Invalid spot: {position} (expected 1..={max})")]
    InvalidSpot { position: i64, max: usize },

    /// Requested spot already holds a vehicle
    #[error("Spot {spot} already occupied by {plate}")]
    SpotOccupied { spot: SpotIndex, plate: Plate },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
