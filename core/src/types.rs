//! Domain types for the Event Management Service.
//!
//! Value objects shared by the engine, the wire protocol and the client:
//! identifiers, seat coordinates and seat-map snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Client-assigned identifier of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(u32);

impl EventId {
    /// Creates an `EventId` from its raw value
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for EventId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a successful multi-seat reservation.
///
/// Allocated per event, starting at 1. A seat holding `0` is free, so a
/// reservation id is never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReservationId(u32);

impl ReservationId {
    /// Creates a `ReservationId` from its raw value
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned identifier of an active session.
///
/// Unique among the sessions active at one instant; reused once its holder
/// has fully disconnected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(u32);

impl SessionId {
    /// Creates a `SessionId` from its raw value
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Seats
// ============================================================================

/// A seat coordinate, 1-based.
///
/// The derived ordering compares `row` first and `col` second, which is the
/// row-major order every reservation acquires seat locks in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Seat {
    /// Row, `1..=rows`
    pub row: usize,
    /// Column, `1..=cols`
    pub col: usize,
}

impl Seat {
    /// Creates a seat coordinate
    #[must_use]
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Whether the seat lies inside a `rows` x `cols` grid
    #[must_use]
    pub const fn within(&self, rows: usize, cols: usize) -> bool {
        self.row >= 1 && self.row <= rows && self.col >= 1 && self.col <= cols
    }
}

impl From<(usize, usize)> for Seat {
    fn from((row, col): (usize, usize)) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.row, self.col)
    }
}

/// A copy of an event's seat map.
///
/// Cells are stored row-major; each holds `0` for a free seat or the id of
/// the reservation that owns it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatGrid {
    rows: usize,
    cols: usize,
    cells: Vec<u32>,
}

impl SeatGrid {
    /// Builds a grid from its dimensions and row-major cells.
    ///
    /// Returns `None` when `cells.len() != rows * cols`.
    #[must_use]
    pub fn from_cells(rows: usize, cols: usize, cells: Vec<u32>) -> Option<Self> {
        (rows.checked_mul(cols)? == cells.len()).then_some(Self { rows, cols, cells })
    }

    /// Builds a grid the engine has already sized correctly
    pub(crate) const fn from_parts(rows: usize, cols: usize, cells: Vec<u32>) -> Self {
        Self { rows, cols, cells }
    }

    /// Number of rows
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// All cells, row-major
    #[must_use]
    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    /// Cell at a 1-based coordinate, or `None` if outside the grid
    #[must_use]
    pub fn get(&self, seat: Seat) -> Option<u32> {
        seat.within(self.rows, self.cols)
            .then(|| self.cells[(seat.row - 1) * self.cols + (seat.col - 1)])
    }

    /// Iterates over the grid one row at a time
    pub fn iter_rows(&self) -> impl Iterator<Item = &[u32]> {
        self.cells.chunks(self.cols.max(1))
    }

    /// Nested-vector form, handy for assertions and logging
    #[must_use]
    pub fn to_rows(&self) -> Vec<Vec<u32>> {
        self.iter_rows().map(<[u32]>::to_vec).collect()
    }

    /// Seats currently owned by `reservation`
    #[must_use]
    pub fn seats_of(&self, reservation: ReservationId) -> Vec<Seat> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| **cell == reservation.get())
            .map(|(i, _)| Seat::new(i / self.cols + 1, i % self.cols + 1))
            .collect()
    }
}

/// One event's seat map, as captured by a diagnostic dump.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSnapshot {
    /// Event identifier
    pub id: EventId,
    /// Seat map at the time of the dump
    pub grid: SeatGrid,
}
