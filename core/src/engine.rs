//! The reservation engine.
//!
//! Implements `create`, `reserve`, `show` and `list_events` over an
//! [`EventStore`], following the store's lock tiers. The engine never performs
//! I/O: sessions call it and turn its results into response frames.
//!
//! # Reservation protocol
//!
//! ```text
//! validate count ─► lookup (shared store lock) ─► validate bounds
//!        │
//!        ▼
//! sort + dedup seats (row-major)
//!        │
//!        ▼
//! for seat in order: write-lock seat ── reserved? ──► release all held, AlreadyReserved
//!        │
//!        ▼
//! next id (event counter) ─► write id to every held seat ─► release
//! ```
//!
//! Every caller acquires overlapping seats in the same relative order, so two
//! reservations can never wait on each other in a cycle. A reservation that
//! meets a taken seat gives up immediately instead of waiting on it.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::store::EventStore;
use crate::types::{EventId, EventSnapshot, ReservationId, Seat, SeatGrid};
use smallvec::SmallVec;
use tokio::sync::RwLockWriteGuard;
use tracing::debug;

/// Seats most reservations fit in without spilling to the heap
const INLINE_SEATS: usize = 16;

/// Concurrent seat reservation engine.
///
/// Cheap to share: wrap it in an `Arc` and hand clones to every worker.
///
/// # Example
///
/// ```
/// use ems_core::{EngineConfig, EventId, ReservationEngine, Seat};
///
/// # tokio_test::block_on(async {
/// let engine = ReservationEngine::new(EngineConfig::default());
/// engine.create(EventId::new(1), 2, 2).await.unwrap();
/// engine
///     .reserve(EventId::new(1), &[Seat::new(1, 1), Seat::new(2, 2)])
///     .await
///     .unwrap();
///
/// let grid = engine.show(EventId::new(1)).await.unwrap();
/// assert_eq!(grid.to_rows(), vec![vec![1, 0], vec![0, 1]]);
/// # });
/// ```
#[derive(Debug)]
pub struct ReservationEngine {
    store: EventStore,
    config: EngineConfig,
}

impl ReservationEngine {
    /// Create an engine over an empty store
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            store: EventStore::new(config.access_delay),
            config,
        }
    }

    /// The configuration this engine was built with
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The underlying store
    #[must_use]
    pub const fn store(&self) -> &EventStore {
        &self.store
    }

    /// Create an event with a zeroed `rows` x `cols` seat grid.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AlreadyExists`] if `event_id` is taken. Of any number
    ///   of concurrent creates with one id, exactly one succeeds.
    /// - [`EngineError::InvalidDimensions`] if either dimension is zero.
    /// - [`EngineError::Allocation`] if the grid cannot be allocated.
    pub async fn create(&self, event_id: EventId, rows: usize, cols: usize) -> Result<(), EngineError> {
        self.store.insert(event_id, rows, cols).await?;
        debug!(%event_id, rows, cols, "Event created");
        Ok(())
    }

    /// Atomically reserve every seat in `seats` under one new reservation id.
    ///
    /// Either all seats end up carrying the returned id or none is modified.
    /// Duplicate coordinates in `seats` are reserved once.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NoSeats`] / [`EngineError::TooManySeats`] if the seat
    ///   count is zero or above the configured bound.
    /// - [`EngineError::NotFound`] if the event does not exist.
    /// - [`EngineError::OutOfBounds`] if any seat lies outside the grid.
    ///   Checked before any seat lock is taken.
    /// - [`EngineError::AlreadyReserved`] if any seat is taken.
    pub async fn reserve(&self, event_id: EventId, seats: &[Seat]) -> Result<ReservationId, EngineError> {
        if seats.is_empty() {
            return Err(EngineError::NoSeats);
        }
        let max = self.config.max_seats_per_reserve;
        if seats.len() > max {
            return Err(EngineError::TooManySeats {
                requested: seats.len(),
                max,
            });
        }

        let event = self
            .store
            .lookup(event_id)
            .await
            .ok_or(EngineError::NotFound(event_id))?;

        let (rows, cols) = (event.rows(), event.cols());
        if let Some(&seat) = seats.iter().find(|seat| !seat.within(rows, cols)) {
            return Err(EngineError::OutOfBounds { seat, rows, cols });
        }

        let mut ordered: SmallVec<[Seat; INLINE_SEATS]> = seats.iter().copied().collect();
        ordered.sort_unstable();
        ordered.dedup();

        let mut held: SmallVec<[RwLockWriteGuard<'_, u32>; INLINE_SEATS]> =
            SmallVec::with_capacity(ordered.len());
        for &seat in &ordered {
            let guard = self.store.lock_seat(&event, seat).await;
            if *guard != 0 {
                debug!(%event_id, %seat, owner = *guard, "Seat already reserved, releasing held seats");
                return Err(EngineError::AlreadyReserved(seat));
            }
            held.push(guard);
        }

        let reservation = event.next_reservation().await;
        for guard in &mut held {
            **guard = reservation;
        }
        drop(held);

        debug!(%event_id, reservation, seats = ordered.len(), "Seats reserved");
        Ok(ReservationId::new(reservation))
    }

    /// Copy an event's seat map.
    ///
    /// Each row is copied atomically with respect to reservations; the grid
    /// as a whole is not a single snapshot, so a reservation spanning rows
    /// may appear in a later row but not yet an earlier one.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] if the event does not exist.
    /// - [`EngineError::Allocation`] if the copy cannot be allocated.
    pub async fn show(&self, event_id: EventId) -> Result<SeatGrid, EngineError> {
        let event = self
            .store
            .lookup(event_id)
            .await
            .ok_or(EngineError::NotFound(event_id))?;
        self.copy_grid(&event).await
    }

    /// Ids of every event, in creation order.
    ///
    /// Holds the shared store lock for the whole traversal, so it never
    /// observes a half-inserted event; concurrent `create` calls wait.
    pub async fn list_events(&self) -> Vec<EventId> {
        let catalog = self.store.read_catalog().await;
        catalog.iter().map(|event| event.id()).collect()
    }

    /// Number of events created so far
    pub async fn event_count(&self) -> usize {
        self.store.len().await
    }

    /// Seat maps of every event, in creation order, for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Allocation`] if a grid copy cannot be allocated.
    pub async fn snapshot(&self) -> Result<Vec<EventSnapshot>, EngineError> {
        let catalog = self.store.read_catalog().await;
        let mut snapshots = Vec::with_capacity(catalog.len());
        for event in catalog.iter() {
            snapshots.push(EventSnapshot {
                id: event.id(),
                grid: self.copy_grid(event).await?,
            });
        }
        Ok(snapshots)
    }

    async fn copy_grid(&self, event: &crate::store::Event) -> Result<SeatGrid, EngineError> {
        let (rows, cols) = (event.rows(), event.cols());
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(rows * cols)
            .map_err(|e| EngineError::Allocation(e.to_string()))?;
        for row in 1..=rows {
            self.store.copy_row(event, row, &mut cells).await;
        }
        Ok(SeatGrid::from_parts(rows, cols, cells))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn engine() -> ReservationEngine {
        ReservationEngine::new(EngineConfig::default())
    }

    fn seats(coords: &[(usize, usize)]) -> Vec<Seat> {
        coords.iter().copied().map(Seat::from).collect()
    }

    #[tokio::test]
    async fn create_reserve_show_list() {
        let engine = engine();
        engine.create(EventId::new(1), 2, 2).await.unwrap();
        let id = engine
            .reserve(EventId::new(1), &seats(&[(1, 1), (2, 2)]))
            .await
            .unwrap();
        assert_eq!(id, ReservationId::new(1));

        let grid = engine.show(EventId::new(1)).await.unwrap();
        assert_eq!(grid.to_rows(), vec![vec![1, 0], vec![0, 1]]);
        assert_eq!(engine.list_events().await, vec![EventId::new(1)]);
    }

    #[tokio::test]
    async fn reservation_ids_follow_successful_calls() {
        let engine = engine();
        engine.create(EventId::new(3), 1, 4).await.unwrap();

        let first = engine.reserve(EventId::new(3), &seats(&[(1, 1)])).await.unwrap();
        // Fails: seat taken. Must not consume an id.
        assert!(engine.reserve(EventId::new(3), &seats(&[(1, 1), (1, 2)])).await.is_err());
        let second = engine.reserve(EventId::new(3), &seats(&[(1, 3), (1, 4)])).await.unwrap();

        assert_eq!((first.get(), second.get()), (1, 2));
        let grid = engine.show(EventId::new(3)).await.unwrap();
        assert_eq!(grid.cells(), &[1, 0, 2, 2]);
        assert_eq!(grid.seats_of(second), seats(&[(1, 3), (1, 4)]));
    }

    #[tokio::test]
    async fn out_of_bounds_mutates_nothing() {
        let engine = engine();
        engine.create(EventId::new(1), 2, 3).await.unwrap();

        for bad in [(0, 1), (3, 1), (1, 0), (1, 4)] {
            let result = engine
                .reserve(EventId::new(1), &seats(&[(1, 1), bad]))
                .await;
            assert!(
                matches!(result, Err(EngineError::OutOfBounds { seat, .. }) if seat == Seat::from(bad)),
                "{bad:?} -> {result:?}"
            );
        }

        let grid = engine.show(EventId::new(1)).await.unwrap();
        assert!(grid.cells().iter().all(|&cell| cell == 0));
    }

    #[tokio::test]
    async fn conflicting_reservation_rolls_back() {
        let engine = engine();
        engine.create(EventId::new(1), 3, 3).await.unwrap();
        engine.reserve(EventId::new(1), &seats(&[(2, 2)])).await.unwrap();

        // (1,1) and (1,3) sort before the taken seat and are locked first.
        let result = engine
            .reserve(EventId::new(1), &seats(&[(3, 3), (2, 2), (1, 1), (1, 3)]))
            .await;
        assert_eq!(result, Err(EngineError::AlreadyReserved(Seat::new(2, 2))));

        let grid = engine.show(EventId::new(1)).await.unwrap();
        assert_eq!(grid.to_rows(), vec![vec![0, 0, 0], vec![0, 1, 0], vec![0, 0, 0]]);

        // The released seats are immediately reservable again.
        let id = engine
            .reserve(EventId::new(1), &seats(&[(1, 1), (1, 3), (3, 3)]))
            .await
            .unwrap();
        assert_eq!(id.get(), 2);
    }

    #[tokio::test]
    async fn duplicate_seats_are_reserved_once() {
        let engine = engine();
        engine.create(EventId::new(1), 1, 2).await.unwrap();
        engine
            .reserve(EventId::new(1), &seats(&[(1, 2), (1, 2), (1, 2)]))
            .await
            .unwrap();
        assert_eq!(engine.show(EventId::new(1)).await.unwrap().cells(), &[0, 1]);
    }

    #[tokio::test]
    async fn seat_count_limits() {
        let engine = ReservationEngine::new(EngineConfig::default().with_max_seats_per_reserve(2));
        engine.create(EventId::new(1), 3, 3).await.unwrap();

        assert_eq!(engine.reserve(EventId::new(1), &[]).await, Err(EngineError::NoSeats));
        assert_eq!(
            engine.reserve(EventId::new(1), &seats(&[(1, 1), (1, 2), (1, 3)])).await,
            Err(EngineError::TooManySeats { requested: 3, max: 2 })
        );
        assert!(engine.reserve(EventId::new(1), &seats(&[(1, 1), (1, 2)])).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_event_is_not_found() {
        let engine = engine();
        assert_eq!(
            engine.reserve(EventId::new(9), &seats(&[(1, 1)])).await,
            Err(EngineError::NotFound(EventId::new(9)))
        );
        assert_eq!(engine.show(EventId::new(9)).await, Err(EngineError::NotFound(EventId::new(9))));
    }

    #[tokio::test]
    async fn list_preserves_creation_order() {
        let engine = engine();
        assert!(engine.list_events().await.is_empty());
        for id in [5, 1, 3] {
            engine.create(EventId::new(id), 1, 1).await.unwrap();
        }
        assert_eq!(
            engine.list_events().await,
            vec![EventId::new(5), EventId::new(1), EventId::new(3)]
        );
        assert_eq!(engine.event_count().await, 3);
    }

    #[tokio::test]
    async fn snapshot_covers_every_event() {
        let engine = engine();
        engine.create(EventId::new(1), 1, 2).await.unwrap();
        engine.create(EventId::new(2), 2, 1).await.unwrap();
        engine.reserve(EventId::new(2), &seats(&[(2, 1)])).await.unwrap();

        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, EventId::new(1));
        assert_eq!(snapshot[0].grid.cells(), &[0, 0]);
        assert_eq!(snapshot[1].grid.to_rows(), vec![vec![0], vec![1]]);
    }
}
