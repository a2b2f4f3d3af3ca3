//! In-memory event store.
//!
//! The store owns every [`Event`] and the seat arena inside it. It provides the
//! lock primitives the [`ReservationEngine`](crate::engine::ReservationEngine)
//! composes into operations; it does not implement any operation itself.
//!
//! # Lock tiers
//!
//! Outermost first:
//!
//! 1. The store-level `RwLock` over the catalog. Written only while an event
//!    is inserted; read while looking an event up or iterating the catalog.
//! 2. Each seat's own `RwLock`, acquired in row-major order.
//! 3. The per-event reservation counter. A leaf: nothing else is acquired
//!    while it is held.
//!
//! Every lookup and seat access awaits the configured access delay while the
//! relevant lock is held.

use crate::error::EngineError;
use crate::types::{EventId, Seat};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A reservable event: a fixed grid of seats plus its reservation counter.
#[derive(Debug)]
pub(crate) struct Event {
    id: EventId,
    rows: usize,
    cols: usize,
    reservations: Mutex<u32>,
    seats: Box<[RwLock<u32>]>,
}

impl Event {
    /// Allocates a zeroed seat arena for a `rows` x `cols` event.
    fn allocate(id: EventId, rows: usize, cols: usize) -> Result<Self, EngineError> {
        if rows == 0 || cols == 0 {
            return Err(EngineError::InvalidDimensions { rows, cols });
        }
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| EngineError::Allocation(format!("{rows}x{cols} seats overflow")))?;

        let mut seats = Vec::new();
        seats
            .try_reserve_exact(len)
            .map_err(|e| EngineError::Allocation(e.to_string()))?;
        seats.extend((0..len).map(|_| RwLock::new(0)));

        Ok(Self {
            id,
            rows,
            cols,
            reservations: Mutex::new(0),
            seats: seats.into_boxed_slice(),
        })
    }

    pub(crate) const fn id(&self) -> EventId {
        self.id
    }

    pub(crate) const fn rows(&self) -> usize {
        self.rows
    }

    pub(crate) const fn cols(&self) -> usize {
        self.cols
    }

    /// Linear index of an in-bounds seat
    const fn seat_index(&self, seat: Seat) -> usize {
        (seat.row - 1) * self.cols + (seat.col - 1)
    }

    /// Takes the next reservation id. Only called once every seat of the
    /// reservation is locked and verified free, so failed calls never
    /// consume an id.
    pub(crate) async fn next_reservation(&self) -> u32 {
        let mut counter = self.reservations.lock().await;
        *counter += 1;
        *counter
    }
}

/// The ordered catalog behind the store-level lock.
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    events: Vec<Arc<Event>>,
    index: HashMap<EventId, usize>,
}

impl Catalog {
    fn get(&self, id: EventId) -> Option<&Arc<Event>> {
        self.index.get(&id).and_then(|&i| self.events.get(i))
    }

    /// Events in creation order
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Event>> {
        self.events.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }
}

/// Append-only collection of events, shared by every session.
///
/// Construct one per server and share it behind an `Arc`; there is no
/// process-global state.
#[derive(Debug)]
pub struct EventStore {
    catalog: RwLock<Catalog>,
    access_delay: Duration,
}

impl EventStore {
    /// Create an empty store with the given per-access delay
    #[must_use]
    pub fn new(access_delay: Duration) -> Self {
        Self {
            catalog: RwLock::new(Catalog::default()),
            access_delay,
        }
    }

    /// Number of events in the store
    pub async fn len(&self) -> usize {
        self.catalog.read().await.len()
    }

    /// Whether the store holds no events
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Awaits the configured access delay
    pub(crate) async fn pause(&self) {
        if !self.access_delay.is_zero() {
            tokio::time::sleep(self.access_delay).await;
        }
    }

    /// Looks an event up under the shared store lock.
    ///
    /// The returned handle stays valid after the lock is released: events are
    /// never removed.
    pub(crate) async fn lookup(&self, id: EventId) -> Option<Arc<Event>> {
        let catalog = self.catalog.read().await;
        self.pause().await;
        catalog.get(id).cloned()
    }

    /// Checks for `id` and appends a new event inside one exclusive section,
    /// so two racing inserts of the same id cannot both succeed.
    ///
    /// The seat arena is allocated before the section, so a large create
    /// does not stall lookups of other events. An existing `id` is still
    /// reported as [`EngineError::AlreadyExists`] when the dimensions are bad.
    pub(crate) async fn insert(&self, id: EventId, rows: usize, cols: usize) -> Result<(), EngineError> {
        let event = match Event::allocate(id, rows, cols) {
            Ok(event) => event,
            Err(_) if self.lookup(id).await.is_some() => return Err(EngineError::AlreadyExists(id)),
            Err(e) => return Err(e),
        };

        // Declared after `event`, so a rejected arena is freed outside the lock
        let mut catalog = self.catalog.write().await;
        self.pause().await;
        if catalog.index.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        catalog
            .events
            .try_reserve(1)
            .map_err(|e| EngineError::Allocation(e.to_string()))?;
        let position = catalog.events.len();
        catalog.events.push(Arc::new(event));
        catalog.index.insert(id, position);
        Ok(())
    }

    /// Holds the shared store lock for a full traversal of the catalog.
    pub(crate) async fn read_catalog(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read().await
    }

    /// Exclusively locks one in-bounds seat, after the access delay.
    pub(crate) async fn lock_seat<'a>(&self, event: &'a Event, seat: Seat) -> RwLockWriteGuard<'a, u32> {
        let guard = event.seats[event.seat_index(seat)].write().await;
        self.pause().await;
        guard
    }

    /// Shares the locks of one whole row and copies it into `out`.
    ///
    /// All of the row's read guards are held together, so a reservation
    /// cannot be observed half-applied within the row.
    pub(crate) async fn copy_row(&self, event: &Event, row: usize, out: &mut Vec<u32>) {
        let start = event.seat_index(Seat::new(row, 1));
        let mut guards = Vec::with_capacity(event.cols);
        for cell in &event.seats[start..start + event.cols] {
            guards.push(cell.read().await);
            self.pause().await;
        }
        out.extend(guards.iter().map(|guard| **guard));
    }
}
