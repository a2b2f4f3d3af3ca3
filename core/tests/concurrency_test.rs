//! Concurrency tests for the reservation engine.
//!
//! These run many tasks against one shared engine, with a small access delay
//! so that lock hold times overlap, and check that racing operations resolve
//! the way a serial execution would.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use ems_core::{EngineError, EventId, ReservationId, Seat};
use ems_testing::properties::seat_near;
use ems_testing::{slow_engine, test_engine};
use futures::future::join_all;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Long enough for lock hold times to overlap across tasks
const ACCESS_DELAY: Duration = Duration::from_micros(200);

/// 50 concurrent creates of one id: exactly one wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_of_same_id() {
    let engine = slow_engine(ACCESS_DELAY);

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.create(EventId::new(7), 1 + i % 3, 2).await })
        })
        .collect();
    let results: Vec<_> = join_all(handles).await.into_iter().map(Result::unwrap).collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one create must succeed");
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == EngineError::AlreadyExists(EventId::new(7))));
    assert_eq!(engine.list_events().await, vec![EventId::new(7)]);
}

/// Creates of distinct ids all succeed and each appears once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_of_distinct_ids() {
    let engine = slow_engine(ACCESS_DELAY);

    let handles: Vec<_> = (1..=20)
        .map(|id| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.create(EventId::new(id), 2, 2).await })
        })
        .collect();
    for result in join_all(handles).await {
        result.unwrap().unwrap();
    }

    let listed: BTreeSet<_> = engine.list_events().await.into_iter().collect();
    assert_eq!(listed, (1..=20).map(EventId::new).collect());
    assert_eq!(engine.event_count().await, 20);
}

/// Listing while creates append: every listing is a prefix of creation
/// order, so it never repeats an id, never invents one, and never shrinks.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn list_is_consistent_during_creates() {
    let engine = slow_engine(Duration::from_micros(50));

    let creates: Vec<_> = (1..=100)
        .map(|id| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.create(EventId::new(id), 1, 1).await })
        })
        .collect();

    let lister = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut previous: Vec<EventId> = Vec::new();
            let mut listings = 0;
            while previous.len() < 100 {
                let listed = engine.list_events().await;
                let unique: HashSet<_> = listed.iter().copied().collect();
                assert_eq!(unique.len(), listed.len(), "duplicate id in {listed:?}");
                assert!(listed.iter().all(|id| (1..=100).contains(&id.get())), "unknown id in {listed:?}");
                assert!(listed.len() >= previous.len(), "listing shrank");
                assert_eq!(&listed[..previous.len()], previous.as_slice(), "earlier order changed");
                previous = listed;
                listings += 1;
            }
            listings
        })
    };

    for result in join_all(creates).await {
        result.unwrap().unwrap();
    }
    let listings = tokio::time::timeout(Duration::from_secs(5), lister)
        .await
        .expect("lister never saw every event")
        .unwrap();
    assert!(listings > 1);
}

/// A large create must not hold up operations on other events while its
/// seat grid is being allocated.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn large_create_does_not_stall_other_events() {
    let engine = Arc::new(test_engine());
    engine.create(EventId::new(1), 1, 1).await.unwrap();

    let create = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let started = Instant::now();
            engine.create(EventId::new(2), 1000, 1000).await.unwrap();
            started.elapsed()
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    let started = Instant::now();
    engine.reserve(EventId::new(1), &[Seat::new(1, 1)]).await.unwrap();
    assert_eq!(engine.show(EventId::new(1)).await.unwrap().cells(), &[1]);
    let other = started.elapsed();

    let create = create.await.unwrap();
    assert!(
        other < create / 2,
        "reserve on another event took {other:?} while create took {create:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disjoint_reservations_both_succeed() {
    let engine = slow_engine(ACCESS_DELAY);
    engine.create(EventId::new(1), 4, 4).await.unwrap();

    let left = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .reserve(EventId::new(1), &[Seat::new(1, 1), Seat::new(2, 1), Seat::new(3, 1)])
                .await
        })
    };
    let right = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .reserve(EventId::new(1), &[Seat::new(4, 4), Seat::new(3, 4), Seat::new(2, 4)])
                .await
        })
    };

    let mut ids = vec![left.await.unwrap().unwrap(), right.await.unwrap().unwrap()];
    ids.sort();
    assert_eq!(ids, vec![ReservationId::new(1), ReservationId::new(2)]);

    let grid = engine.show(EventId::new(1)).await.unwrap();
    for id in ids {
        assert_eq!(grid.seats_of(id).len(), 3);
    }
    assert_eq!(grid.cells().iter().filter(|&&c| c == 0).count(), 10);
}

/// Overlapping reservations, listed in opposite orders: exactly one wins and
/// the loser leaves no trace.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_reservations_resolve_to_one_winner() {
    for _ in 0..10 {
        let engine = slow_engine(ACCESS_DELAY);
        engine.create(EventId::new(1), 3, 3).await.unwrap();

        let forward = [Seat::new(1, 1), Seat::new(2, 2), Seat::new(3, 3)];
        let backward = [Seat::new(3, 3), Seat::new(2, 2), Seat::new(1, 2)];

        let a = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.reserve(EventId::new(1), &forward).await })
        };
        let b = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.reserve(EventId::new(1), &backward).await })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert!(a.is_ok() ^ b.is_ok(), "exactly one must win: {a:?} {b:?}");
        let loser = if a.is_ok() { &b } else { &a };
        assert!(matches!(loser, Err(EngineError::AlreadyReserved(_))));

        let grid = engine.show(EventId::new(1)).await.unwrap();
        let winner_seats: BTreeSet<Seat> = if a.is_ok() { forward.into() } else { backward.into() };
        for row in 1..=3 {
            for col in 1..=3 {
                let seat = Seat::new(row, col);
                let expected = u32::from(winner_seats.contains(&seat));
                assert_eq!(grid.get(seat), Some(expected), "seat {seat}");
            }
        }
    }
}

/// Many tasks competing for the seats of a small event: every seat ends up
/// owned by exactly one reservation, and reservation ids are dense.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contention_never_double_books() {
    let engine = slow_engine(ACCESS_DELAY);
    engine.create(EventId::new(1), 2, 5).await.unwrap();

    let handles: Vec<_> = (0..40usize)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let seats = [Seat::new(1 + i % 2, 1 + i % 5), Seat::new(1 + (i / 2) % 2, 1 + (i + 1) % 5)];
            tokio::spawn(async move { engine.reserve(EventId::new(1), &seats).await })
        })
        .collect();
    let granted: Vec<ReservationId> = join_all(handles)
        .await
        .into_iter()
        .filter_map(|r| r.unwrap().ok())
        .collect();

    let mut raw: Vec<u32> = granted.iter().map(|id| id.get()).collect();
    raw.sort_unstable();
    assert_eq!(raw, (1..=u32::try_from(granted.len()).unwrap()).collect::<Vec<_>>());

    let grid = engine.show(EventId::new(1)).await.unwrap();
    for id in &granted {
        assert!(!grid.seats_of(*id).is_empty(), "reservation {id} owns no seat");
    }
}

/// Readers see every row either before or after a reservation, never half of it.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn show_sees_whole_rows() {
    let engine = slow_engine(ACCESS_DELAY);
    engine.create(EventId::new(1), 1, 8).await.unwrap();

    let writer = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let row: Vec<Seat> = (1..=8).map(|col| Seat::new(1, col)).collect();
            engine.reserve(EventId::new(1), &row).await
        })
    };
    let readers: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.show(EventId::new(1)).await })
        })
        .collect();

    writer.await.unwrap().unwrap();
    for reader in join_all(readers).await {
        let grid = reader.unwrap().unwrap();
        let first = grid.cells()[0];
        assert!(grid.cells().iter().all(|&c| c == first), "torn row {:?}", grid.cells());
    }
}

#[tokio::test]
async fn reserve_then_show_end_to_end() {
    let engine = test_engine();
    engine.create(EventId::new(1), 2, 2).await.unwrap();
    engine
        .reserve(EventId::new(1), &[Seat::new(1, 1), Seat::new(2, 2)])
        .await
        .unwrap();

    assert_eq!(
        engine.show(EventId::new(1)).await.unwrap().to_rows(),
        vec![vec![1, 0], vec![0, 1]]
    );
    assert_eq!(engine.list_events().await, vec![EventId::new(1)]);
}

proptest! {
    /// A reservation either fails without touching the grid, or marks exactly
    /// the requested seats.
    #[test]
    fn reserve_is_all_or_nothing(
        rows in 1usize..6,
        cols in 1usize..6,
        seats in prop::collection::vec(seat_near(5, 5), 1..8),
    ) {
        let engine = test_engine();
        let (result, grid) = tokio_test::block_on(async {
            engine.create(EventId::new(1), rows, cols).await.unwrap();
            let result = engine.reserve(EventId::new(1), &seats).await;
            (result, engine.show(EventId::new(1)).await.unwrap())
        });

        let outside = seats.iter().find(|s| !s.within(rows, cols));
        match (outside, result) {
            (Some(_), Err(EngineError::OutOfBounds { .. })) => {
                prop_assert!(grid.cells().iter().all(|&c| c == 0));
            }
            (None, Ok(id)) => {
                prop_assert_eq!(id, ReservationId::new(1));
                let wanted: BTreeSet<Seat> = seats.iter().copied().collect();
                let owned: BTreeSet<Seat> = grid.seats_of(id).into_iter().collect();
                prop_assert_eq!(owned, wanted);
            }
            (outside, result) => prop_assert!(false, "outside={outside:?} result={result:?}"),
        }
    }

    /// Sequential reservations on one event are numbered 1, 2, ... by success.
    #[test]
    fn ids_count_successes_only(batches in prop::collection::vec(prop::collection::vec(seat_near(4, 4), 1..4), 1..10)) {
        let engine = test_engine();
        let ids = tokio_test::block_on(async {
            engine.create(EventId::new(1), 4, 4).await.unwrap();
            let mut ids = Vec::new();
            for batch in &batches {
                if let Ok(id) = engine.reserve(EventId::new(1), batch).await {
                    ids.push(id.get());
                }
            }
            ids
        });
        let expected: Vec<u32> = (1..=u32::try_from(ids.len()).unwrap()).collect();
        prop_assert_eq!(ids, expected);
    }
}
