//! # EMS Core
//!
//! Data model, event store, reservation engine and wire protocol for the
//! Event Management Service.
//!
//! This crate performs no I/O of its own beyond the protocol codec, which is
//! generic over `AsyncRead`/`AsyncWrite`. The runtime crate owns sessions,
//! admission and transports.
//!
//! ## Core Concepts
//!
//! - **Event**: a fixed `rows` x `cols` grid of seats with a client-chosen id
//! - **Seat**: a 1-based coordinate, free (`0`) or owned by one reservation
//! - **Reservation**: an all-or-nothing claim on a set of seats, numbered
//!   per event from 1
//! - **Event Store**: the append-only catalog shared by every session
//!
//! ## Concurrency
//!
//! - Store-level `RwLock` for the catalog; only `create` writes it
//! - One `RwLock` per seat, acquired in row-major order
//! - A per-event counter lock, taken last
//!
//! ## Example
//!
//! ```
//! use ems_core::{EngineConfig, EngineError, EventId, ReservationEngine, Seat};
//!
//! # tokio_test::block_on(async {
//! let engine = ReservationEngine::new(EngineConfig::default());
//! engine.create(EventId::new(1), 2, 2).await.unwrap();
//!
//! let seats = [Seat::new(1, 1)];
//! engine.reserve(EventId::new(1), &seats).await.unwrap();
//! assert_eq!(
//!     engine.reserve(EventId::new(1), &seats).await,
//!     Err(EngineError::AlreadyReserved(Seat::new(1, 1)))
//! );
//! # });
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use engine::ReservationEngine;
pub use error::{EngineError, Status};
pub use protocol::{OpCode, ProtocolError, Request, RequestFrame, Response, SetupRequest};
pub use store::EventStore;
pub use types::{EventId, EventSnapshot, ReservationId, Seat, SeatGrid, SessionId};
