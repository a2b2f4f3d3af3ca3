//! # EMS Testing
//!
//! Testing utilities and helpers for the Event Management Service.
//!
//! This crate provides:
//! - An in-memory [`Transport`](ems_runtime::Transport) built on duplex pipes
//! - A [`TestServer`] harness that runs the full server without sockets
//! - Engine builders
//! - Property-based testing strategies for domain types
//!
//! ## Example
//!
//! ```ignore
//! use ems_testing::TestServer;
//!
//! #[tokio::test]
//! async fn test_reserve_flow() {
//!     let server = TestServer::with_max_sessions(2);
//!     let mut client = server.connect().await.unwrap();
//!
//!     client.create(EventId::new(1), 2, 2).await.unwrap();
//!     client.reserve(EventId::new(1), &[Seat::new(1, 1)]).await.unwrap();
//!
//!     let grid = client.show(EventId::new(1)).await.unwrap();
//!     assert_eq!(grid.to_rows(), vec![vec![1, 0], vec![0, 0]]);
//! }
//! ```

/// In-memory transport
pub mod mocks;

/// Test servers and engine builders
pub mod helpers;

/// Property-based testing strategies using proptest.
pub mod properties {
    use ems_core::Seat;
    use proptest::prelude::*;

    /// A seat inside a `rows` x `cols` grid
    pub fn seat_within(rows: usize, cols: usize) -> impl Strategy<Value = Seat> {
        (1..=rows, 1..=cols).prop_map(Seat::from)
    }

    /// A seat that may fall outside a `rows` x `cols` grid, including the
    /// zero row and column
    pub fn seat_near(rows: usize, cols: usize) -> impl Strategy<Value = Seat> {
        (0..=rows + 1, 0..=cols + 1).prop_map(Seat::from)
    }

    /// Grid dimensions up to `max` x `max`
    pub fn dimensions(max: usize) -> impl Strategy<Value = (usize, usize)> {
        (1..=max, 1..=max)
    }

    /// Dimensions together with a non-empty list of in-bounds seats
    pub fn grid_and_seats(max: usize, max_seats: usize) -> impl Strategy<Value = ((usize, usize), Vec<Seat>)> {
        dimensions(max).prop_flat_map(move |(rows, cols)| {
            (
                Just((rows, cols)),
                prop::collection::vec(seat_within(rows, cols), 1..=max_seats),
            )
        })
    }
}

pub use helpers::{TestServer, engine_with_events, init_test_tracing, slow_engine, test_engine};
pub use mocks::{MemoryChannels, MemoryTransport};
