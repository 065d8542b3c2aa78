//! The fixed-size occupancy table.
//!
//! `OccupancyTable` has no locking of its own. The daemon keeps it behind a
//! single lock and calls [`OccupancyTable::apply`] for the whole
//! lookup-then-mutate sequence, which is what makes "exit beats entry"
//! atomic with respect to other clients.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::{DomainError, DomainResult, Occupant, Plate, Spot, SpotIndex, NUM_SPOTS};

/// State change produced by a successful [`OccupancyTable::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A vehicle took a free spot.
    Entered {
        spot: SpotIndex,
        plate: Plate,
        timestamp: Option<String>,
    },

    /// A parked vehicle left; `occupant` is the record that was removed.
    Exited { spot: SpotIndex, occupant: Occupant },
}

impl Transition {
    /// The spot whose state changed.
    pub fn spot(&self) -> SpotIndex {
        match self {
            Transition::Entered { spot, .. } | Transition::Exited { spot, .. } => *spot,
        }
    }
}

/// Ordered collection of exactly [`NUM_SPOTS`] spots.
///
/// Invariant: a plate occupies at most one spot.
#[derive(Debug, Clone)]
pub struct OccupancyTable {
    spots: Vec<Spot>,
}

impl OccupancyTable {
    /// Creates a table with every spot empty.
    pub fn new() -> Self {
        Self {
            spots: vec![Spot::Empty; NUM_SPOTS],
        }
    }

    /// Applies an entry/exit report.
    ///
    /// 1. If `plate` is parked anywhere, that spot is freed (the requested
    ///    `spot` is ignored).
    /// 2. Otherwise, if `spot` is taken, the report is rejected.
    /// 3. Otherwise the vehicle is parked at `spot`.
    ///
    /// A rejected report leaves the table untouched.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SpotOccupied` in case 2.
    pub fn apply(
        &mut self,
        spot: SpotIndex,
        plate: Plate,
        timestamp: Option<String>,
    ) -> DomainResult<Transition> {
        if let Some((current, occupant)) = self.take_plate(&plate) {
            trace!(spot = %current, plate = %occupant.plate, "Spot vacated");
            return Ok(Transition::Exited {
                spot: current,
                occupant,
            });
        }

        let slot = self.slot_mut(spot)?;
        if let Spot::Occupied(holder) = slot {
            return Err(DomainError::SpotOccupied {
                spot,
                plate: holder.plate.clone(),
            });
        }

        *slot = Spot::Occupied(Occupant::new(plate.clone(), timestamp.clone()));
        trace!(spot = %spot, plate = %plate, "Spot occupied");
        Ok(Transition::Entered {
            spot,
            plate,
            timestamp,
        })
    }

    /// Finds the spot currently held by `plate`.
    pub fn find_plate(&self, plate: &Plate) -> Option<SpotIndex> {
        SpotIndex::all().find(|index| self.spot(*index).is_some_and(|s| s.holds(plate)))
    }

    /// Returns the spot at `index`.
    pub fn spot(&self, index: SpotIndex) -> Option<&Spot> {
        self.spots.get(index.get())
    }

    #[must_use]
    pub fn is_occupied(&self, index: SpotIndex) -> bool {
        self.spot(index).is_some_and(Spot::is_occupied)
    }

    pub fn total(&self) -> usize {
        self.spots.len()
    }

    pub fn occupied_count(&self) -> usize {
        self.spots.iter().filter(|s| s.is_occupied()).count()
    }

    pub fn free_count(&self) -> usize {
        self.total() - self.occupied_count()
    }

    /// Copies out the occupied spots for reporting outside the lock.
    pub fn snapshot(&self) -> OccupancySnapshot {
        let occupied = SpotIndex::all()
            .filter_map(|index| {
                let occupant = self.spot(index)?.occupant()?;
                Some(OccupiedSpot {
                    spot: index,
                    plate: occupant.plate.clone(),
                    timestamp: occupant.timestamp.clone(),
                    parked_at: occupant.parked_at,
                })
            })
            .collect();

        OccupancySnapshot {
            occupied,
            total: self.total(),
        }
    }

    /// Empties the spot held by `plate`, returning where it was and who held it.
    fn take_plate(&mut self, plate: &Plate) -> Option<(SpotIndex, Occupant)> {
        let (index, slot) = SpotIndex::all()
            .zip(self.spots.iter_mut())
            .find(|(_, slot)| slot.holds(plate))?;

        match std::mem::take(slot) {
            Spot::Occupied(occupant) => Some((index, occupant)),
            Spot::Empty => None,
        }
    }

    fn slot_mut(&mut self, index: SpotIndex) -> DomainResult<&mut Spot> {
        self.spots
            .get_mut(index.get())
            .ok_or(DomainError::InvalidSpot {
                position: index.position() as i64,
                max: NUM_SPOTS,
            })
    }
}

impl Default for OccupancyTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// One occupied spot in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupiedSpot {
    pub spot: SpotIndex,
    pub plate: Plate,
    pub timestamp: Option<String>,
    pub parked_at: DateTime<Utc>,
}

/// Point-in-time copy of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancySnapshot {
    /// Occupied spots in table order
    pub occupied: Vec<OccupiedSpot>,

    /// Total number of spots
    pub total: usize,
}

impl OccupancySnapshot {
    pub fn occupied_count(&self) -> usize {
        self.occupied.len()
    }

    pub fn free_count(&self) -> usize {
        self.total.saturating_sub(self.occupied.len())
    }

    /// Looks up a spot in the snapshot.
    pub fn get(&self, spot: SpotIndex) -> Option<&OccupiedSpot> {
        self.occupied.iter().find(|o| o.spot == spot)
    }
}

impl fmt::Display for OccupancySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "--- parking status: {}/{} occupied ---",
            self.occupied_count(),
            self.total
        )?;
        for entry in &self.occupied {
            write!(f, "  spot {:>2}: {}", entry.spot, entry.plate)?;
            if let Some(ts) = &entry.timestamp {
                write!(f, " @ {ts}")?;
            }
            writeln!(f, " (since {})", entry.parked_at.format("%H:%M:%S"))?;
        }
        Ok(())
    }
}
