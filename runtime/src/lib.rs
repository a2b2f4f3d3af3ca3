//! # EMS Runtime
//!
//! Sessions, admission and dispatch for the Event Management Service.
//!
//! This crate turns the [`ReservationEngine`](ems_core::ReservationEngine)
//! into a server: clients register, wait for a session slot, get a worker,
//! and drive the engine through the framed protocol.
//!
//! ## Core Components
//!
//! - **Session Admission**: a counting semaphore bounding concurrent sessions
//! - **Admission Queue**: FIFO of admitted sessions waiting for a worker
//! - **Worker Pool**: fixed set of tasks, one session each at a time
//! - **Session**: the per-session request/response loop
//! - **Transport**: opens a session's channels from their registered paths
//!
//! ## Example
//!
//! ```rust,no_run
//! use ems_runtime::{Server, ServerConfig, UnixTransport, bind_registration};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::start(&ServerConfig::default(), Arc::new(UnixTransport));
//! let listener = bind_registration(Path::new("/tmp/ems.sock"))?;
//! server.run_registration(&listener).await;
//! # Ok(())
//! # }
//! ```

/// Session admission control
pub mod admission;

/// Error types for the runtime
pub mod error;

/// Prometheus metrics for observability
pub mod metrics;

/// Admission queue
pub mod queue;

/// Server wiring and registration
pub mod server;

/// Per-session dispatch loop
pub mod session;

/// Channel transports
pub mod transport;

/// Worker pool
pub mod worker;

pub use admission::{AdmissionPermit, SessionAdmission};
pub use error::{AdmissionError, ServerError, SessionError};
pub use queue::AdmissionQueue;
pub use server::{Server, ServerConfig, bind_registration};
pub use session::{PendingSession, Session, SessionEnd};
pub use transport::{RequestChannel, ResponseChannel, SessionChannels, Transport, UnixTransport};
pub use worker::WorkerPool;
