//! Error types for the reservation engine.

use crate::types::{EventId, Seat};
use thiserror::Error;

/// Errors returned by [`ReservationEngine`](crate::engine::ReservationEngine) operations.
///
/// These are business outcomes, not faults: a session reports them to its
/// client as a nonzero [`Status`] and keeps serving.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// An event with this id already exists
    #[error("Event {0} already exists")]
    AlreadyExists(EventId),

    /// No event with this id exists
    #[error("Event {0} not found")]
    NotFound(EventId),

    /// A requested seat lies outside the event's grid
    #[error("Seat {seat} is outside the {rows}x{cols} grid")]
    OutOfBounds {
        /// The offending seat
        seat: Seat,
        /// Grid rows
        rows: usize,
        /// Grid columns
        cols: usize,
    },

    /// A requested seat is already owned by another reservation
    #[error("Seat {0} is already reserved")]
    AlreadyReserved(Seat),

    /// An event must have at least one row and one column
    #[error("Invalid event dimensions {rows}x{cols}")]
    InvalidDimensions {
        /// Requested rows
        rows: usize,
        /// Requested columns
        cols: usize,
    },

    /// A reservation must name at least one seat
    #[error("Reservation requests no seats")]
    NoSeats,

    /// A reservation names more seats than a single call may reserve
    #[error("Reservation requests {requested} seats, limit is {max}")]
    TooManySeats {
        /// Seats requested
        requested: usize,
        /// Configured limit
        max: usize,
    },

    /// The seat grid could not be allocated
    #[error("Failed to allocate seat grid: {0}")]
    Allocation(String),
}

impl EngineError {
    /// Wire status reported to the client for this error
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::AlreadyExists(_) => Status::AlreadyExists,
            Self::NotFound(_) => Status::NotFound,
            Self::OutOfBounds { .. } => Status::OutOfBounds,
            Self::AlreadyReserved(_) => Status::AlreadyReserved,
            Self::InvalidDimensions { .. } => Status::InvalidDimensions,
            Self::NoSeats => Status::NoSeats,
            Self::TooManySeats { .. } => Status::TooManySeats,
            Self::Allocation(_) => Status::Allocation,
        }
    }
}

/// Response status carried as the first field of every response frame.
///
/// `0` is success. Any nonzero value is a failure; clients that only care
/// about success can test [`Status::is_ok`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// Operation succeeded
    Ok,
    /// See [`EngineError::AlreadyExists`]
    AlreadyExists,
    /// See [`EngineError::NotFound`]
    NotFound,
    /// See [`EngineError::OutOfBounds`]
    OutOfBounds,
    /// See [`EngineError::AlreadyReserved`]
    AlreadyReserved,
    /// See [`EngineError::InvalidDimensions`]
    InvalidDimensions,
    /// See [`EngineError::NoSeats`]
    NoSeats,
    /// See [`EngineError::TooManySeats`]
    TooManySeats,
    /// See [`EngineError::Allocation`]
    Allocation,
    /// A nonzero code this build does not know
    Unknown(i32),
}

impl Status {
    /// Numeric wire code
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::AlreadyExists => 1,
            Self::NotFound => 2,
            Self::OutOfBounds => 3,
            Self::AlreadyReserved => 4,
            Self::InvalidDimensions => 5,
            Self::NoSeats => 6,
            Self::TooManySeats => 7,
            Self::Allocation => 8,
            Self::Unknown(code) => code,
        }
    }

    /// Decodes a wire code
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::AlreadyExists,
            2 => Self::NotFound,
            3 => Self::OutOfBounds,
            4 => Self::AlreadyReserved,
            5 => Self::InvalidDimensions,
            6 => Self::NoSeats,
            7 => Self::TooManySeats,
            8 => Self::Allocation,
            other => Self::Unknown(other),
        }
    }

    /// Whether this is the success status
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::AlreadyExists => write!(f, "already exists"),
            Self::NotFound => write!(f, "not found"),
            Self::OutOfBounds => write!(f, "out of bounds"),
            Self::AlreadyReserved => write!(f, "already reserved"),
            Self::InvalidDimensions => write!(f, "invalid dimensions"),
            Self::NoSeats => write!(f, "no seats"),
            Self::TooManySeats => write!(f, "too many seats"),
            Self::Allocation => write!(f, "allocation failure"),
            Self::Unknown(code) => write!(f, "unknown status {code}"),
        }
    }
}

impl<T> From<&Result<T, EngineError>> for Status {
    fn from(result: &Result<T, EngineError>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(e) => e.status(),
        }
    }
}
