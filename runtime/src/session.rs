//! Per-session request dispatch.
//!
//! A session moves through `AWAITING_OP -> DISPATCHED -> AWAITING_OP` until
//! the client quits, closes its request channel, or breaks the protocol.
//! Engine failures are reported to the client and never end the session.

use crate::admission::AdmissionPermit;
use crate::error::SessionError;
use crate::metrics::OperationMetrics;
use crate::transport::SessionChannels;
use ems_core::protocol::{RequestDecoder, write_session_id};
use ems_core::{ReservationEngine, Request, Response, SessionId, SetupRequest};
use std::time::Instant;
use tracing::{debug, warn};

/// An admitted registration waiting in the queue for a worker.
#[derive(Debug)]
pub struct PendingSession {
    endpoints: SetupRequest,
    permit: AdmissionPermit,
    queued_at: Instant,
}

impl PendingSession {
    /// Pair a registration with the slot it was admitted under
    #[must_use]
    pub fn new(endpoints: SetupRequest, permit: AdmissionPermit) -> Self {
        Self {
            endpoints,
            permit,
            queued_at: Instant::now(),
        }
    }

    /// Channel paths the client registered
    #[must_use]
    pub const fn endpoints(&self) -> &SetupRequest {
        &self.endpoints
    }

    /// When the session entered the queue
    #[must_use]
    pub const fn queued_at(&self) -> Instant {
        self.queued_at
    }

    /// Split into endpoints and slot
    #[must_use]
    pub fn into_parts(self) -> (SetupRequest, AdmissionPermit) {
        (self.endpoints, self.permit)
    }
}

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client sent `quit`
    Quit,
    /// The client closed its request channel between requests, or stopped
    /// reading responses
    Closed,
}

/// An active session: its id, its channels and the engine it drives.
pub struct Session<'a> {
    id: SessionId,
    engine: &'a ReservationEngine,
    channels: SessionChannels,
    decoder: RequestDecoder,
}

impl<'a> Session<'a> {
    /// Bind open channels to a session id
    #[must_use]
    pub fn new(id: SessionId, engine: &'a ReservationEngine, channels: SessionChannels) -> Self {
        let decoder = RequestDecoder::new(engine.config().max_seats_per_reserve);
        Self {
            id,
            engine,
            channels,
            decoder,
        }
    }

    /// Session id
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Tell the client its session id.
    ///
    /// # Errors
    ///
    /// Fails if the response channel is already gone.
    pub async fn announce(&mut self) -> Result<(), SessionError> {
        write_session_id(&mut self.channels.responses, self.id).await?;
        Ok(())
    }

    /// Serve requests until the session ends.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Protocol`] on a malformed frame
    /// - [`SessionError::Fatal`] if a channel fails
    pub async fn serve(&mut self) -> Result<SessionEnd, SessionError> {
        loop {
            let Some(frame) = self.decoder.read_frame(&mut self.channels.requests).await? else {
                return Ok(SessionEnd::Closed);
            };
            if frame.session != self.id {
                warn!(
                    session_id = %self.id,
                    claimed = %frame.session,
                    "Request carries another session's id, serving it anyway"
                );
            }

            let op = frame.request.opcode();
            let started = Instant::now();
            let Some(response) = Self::dispatch(self.engine, frame.request).await else {
                return Ok(SessionEnd::Quit);
            };
            OperationMetrics::record(op, response.status(), started.elapsed());
            debug!(session_id = %self.id, op = op.name(), status = %response.status(), "Request served");

            match response.write_to(&mut self.channels.responses).await {
                Ok(()) => {}
                Err(e) if e.is_disconnect() => {
                    debug!(session_id = %self.id, "Client stopped reading responses");
                    return Ok(SessionEnd::Closed);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Run one request against the engine. `None` means quit.
    ///
    /// Takes the engine rather than `&self`: the channels are not `Sync`.
    async fn dispatch(engine: &ReservationEngine, request: Request) -> Option<Response> {
        let response = match request {
            Request::Quit => return None,
            Request::Create { event_id, rows, cols } => {
                Response::ack(&engine.create(event_id, rows, cols).await)
            }
            Request::Reserve { event_id, seats } => {
                Response::ack(&engine.reserve(event_id, &seats).await)
            }
            Request::Show { event_id } => Response::grid(engine.show(event_id).await),
            Request::List => Response::Events(engine.list_events().await),
        };
        Some(response)
    }
}
