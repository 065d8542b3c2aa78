//! Occupancy service - owns the table and the state lock.
//!
//! Every read-modify-write against the table happens inside
//! [`OccupancyService::apply`] while holding one `std::sync::Mutex`. The lock
//! is never held across an `.await` or any I/O: logging uses values copied
//! out while the lock was held.
//!
//! # Panic-Free Guarantees
//!
//! A poisoned lock is recovered with `PoisonError::into_inner`; the table has
//! no invariant that a panicking reader could break halfway.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, enabled, info, Level};

use parking_core::{
    OccupancySnapshot, OccupancyTable, Plate, Spot, SpotIndex, Transition,
};
use parking_protocol::{Notice, Request, Response};

/// Result of applying one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Reply for the requester
    pub response: Response,

    /// Notice for every other client, if state changed
    pub notice: Option<Notice>,
}

impl Outcome {
    /// An outcome that only answers the requester.
    pub fn reply_only(response: Response) -> Self {
        Self {
            response,
            notice: None,
        }
    }
}

/// Shared occupancy state.
///
/// Cheap to share behind an `Arc`; all access goes through methods.
pub struct OccupancyService {
    table: Mutex<OccupancyTable>,
}

impl OccupancyService {
    /// Creates a service with every spot empty.
    pub fn new() -> Self {
        Self {
            table: Mutex::new(OccupancyTable::new()),
        }
    }

    /// Applies a validated request.
    ///
    /// A plate that is already parked always exits from the spot it holds,
    /// whatever spot the request names. Otherwise the vehicle parks at the
    /// requested spot, or the request is rejected if that spot is taken.
    pub fn apply(&self, request: Request) -> Outcome {
        let Request {
            spot,
            plate,
            timestamp,
        } = request;

        let (result, occupied, total, board) = {
            let mut table = self.lock();
            let result = table.apply(spot, plate.clone(), timestamp);
            let board = enabled!(Level::DEBUG).then(|| table.snapshot());
            (result, table.occupied_count(), table.total(), board)
        };

        let outcome = match result {
            Ok(transition) => {
                log_transition(&transition, occupied, total);
                Outcome {
                    response: Response::for_transition(&transition),
                    notice: Some(Notice::for_transition(&transition)),
                }
            }
            Err(e) => {
                debug!(spot = %spot, plate = %plate, error = %e, "Request rejected");
                Outcome::reply_only(Response::from(&e))
            }
        };

        if let Some(board) = board {
            debug!("\n{board}");
        }

        outcome
    }

    /// Copies the current table state.
    pub fn snapshot(&self) -> OccupancySnapshot {
        self.lock().snapshot()
    }

    /// Returns a copy of one spot.
    pub fn spot(&self, index: SpotIndex) -> Option<Spot> {
        self.lock().spot(index).cloned()
    }

    /// Finds where `plate` is parked.
    pub fn find_plate(&self, plate: &Plate) -> Option<SpotIndex> {
        self.lock().find_plate(plate)
    }

    pub fn occupied_count(&self) -> usize {
        self.lock().occupied_count()
    }

    pub fn free_count(&self) -> usize {
        self.lock().free_count()
    }

    pub fn total_spots(&self) -> usize {
        self.lock().total()
    }

    fn lock(&self) -> MutexGuard<'_, OccupancyTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for OccupancyService {
    fn default() -> Self {
        Self::new()
    }
}

fn log_transition(transition: &Transition, occupied: usize, total: usize) {
    match transition {
        Transition::Entered {
            spot,
            plate,
            timestamp,
        } => {
            info!(
                spot = %spot,
                plate = %plate,
                timestamp = timestamp.as_deref().unwrap_or("-"),
                occupied,
                total,
                "Vehicle entered"
            );
        }
        Transition::Exited { spot, occupant } => {
            info!(
                spot = %spot,
                plate = %occupant.plate,
                timestamp = occupant.timestamp.as_deref().unwrap_or("-"),
                parked_at = %occupant.parked_at.format("%H:%M:%S"),
                occupied,
                total,
                "Vehicle exited"
            );
        }
    }
}
