//! Server wiring: engine, admission, queue and worker pool.
//!
//! ```text
//! registration ──► admission.acquire() ──► queue.enqueue() ──► worker
//!  (setup record)     (waits for a slot)                       (serve, then
//!                                                               free the slot)
//! ```

use crate::admission::SessionAdmission;
use crate::error::ServerError;
use crate::queue::AdmissionQueue;
use crate::session::PendingSession;
use crate::transport::Transport;
use crate::worker::WorkerPool;
use ems_core::{EngineConfig, ReservationEngine, SetupRequest};
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

/// Default number of concurrent sessions
pub const DEFAULT_MAX_SESSIONS: usize = 8;

/// How long a registration connection may take to deliver its setup record
pub const REGISTRATION_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept, so a persistent error such as `EMFILE` does
/// not spin the registration loop
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Maximum concurrent sessions, and number of workers
    pub max_sessions: usize,
    /// Engine settings
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Set the session limit
    #[must_use]
    pub const fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// Set the engine configuration
    #[must_use]
    pub const fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            engine: EngineConfig::default(),
        }
    }
}

/// A running reservation server.
#[derive(Debug)]
pub struct Server {
    engine: Arc<ReservationEngine>,
    admission: SessionAdmission,
    queue: Arc<AdmissionQueue<PendingSession>>,
    pool: WorkerPool,
}

impl Server {
    /// Create the engine and spawn the worker pool.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(config: &ServerConfig, transport: Arc<dyn Transport>) -> Self {
        let engine = Arc::new(ReservationEngine::new(config.engine.clone()));
        let admission = SessionAdmission::new(config.max_sessions);
        let queue = Arc::new(AdmissionQueue::new());
        let pool = WorkerPool::spawn(
            config.max_sessions,
            Arc::clone(&queue),
            Arc::clone(&engine),
            transport,
        );
        info!(
            max_sessions = config.max_sessions,
            max_seats_per_reserve = config.engine.max_seats_per_reserve,
            access_delay_us = u64::try_from(config.engine.access_delay.as_micros()).unwrap_or(u64::MAX),
            "Server started"
        );
        Self {
            engine,
            admission,
            queue,
            pool,
        }
    }

    /// The shared engine
    #[must_use]
    pub const fn engine(&self) -> &Arc<ReservationEngine> {
        &self.engine
    }

    /// Session admission control
    #[must_use]
    pub const fn admission(&self) -> &SessionAdmission {
        &self.admission
    }

    /// Sessions admitted but not yet picked up by a worker
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Admit a registration: wait for a session slot, then queue it.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Admission`] if admission is closed.
    pub async fn admit(&self, setup: SetupRequest) -> Result<(), ServerError> {
        let permit = self.admission.acquire().await?;
        debug!(
            request_path = setup.request_path(),
            response_path = setup.response_path(),
            "Registration admitted"
        );
        self.queue.enqueue(PendingSession::new(setup, permit));
        Ok(())
    }

    /// Read one setup record from `reader` and admit it.
    ///
    /// # Errors
    ///
    /// - [`ServerError::RegistrationTimeout`] if no full record arrives in time
    /// - [`ServerError::Registration`] if the record is invalid
    /// - [`ServerError::Admission`] if admission is closed
    pub async fn register<R>(&self, reader: &mut R) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let setup = tokio::time::timeout(REGISTRATION_READ_TIMEOUT, SetupRequest::read_from(reader))
            .await
            .map_err(|_| ServerError::RegistrationTimeout)??;
        self.admit(setup).await
    }

    /// Accept registrations on `listener` until admission closes.
    ///
    /// Registrations are handled one at a time, in arrival order; while every
    /// slot is taken, new registrations wait in the listener's backlog.
    /// Invalid registrations and failed accepts are logged and skipped.
    pub async fn run_registration(&self, listener: &UnixListener) {
        self.serve_registrations(|| async move { listener.accept().await.map(|(stream, _)| stream) })
            .await;
    }

    /// Registration loop over any source of connections.
    pub(crate) async fn serve_registrations<F, Fut, S>(&self, mut accept: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<S>>,
        S: AsyncRead + Unpin,
    {
        loop {
            let mut stream = match accept().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Accepting a registration failed");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };
            match self.register(&mut stream).await {
                Ok(()) => {}
                Err(ServerError::Admission(e)) => {
                    info!(error = %e, "Registration stopped");
                    return;
                }
                Err(e) => warn!(error = %e, "Rejected registration"),
            }
        }
    }

    /// Stop admitting sessions and shut the worker pool down.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ShutdownTimeout`] if sessions were still being
    /// served after `timeout`.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), ServerError> {
        self.admission.close();
        self.pool.shutdown(timeout).await
    }
}

/// Bind the registration endpoint, replacing a stale socket file.
///
/// # Errors
///
/// Returns [`ServerError::Endpoint`] if the old file cannot be removed or the
/// socket cannot be bound.
pub fn bind_registration(path: &Path) -> Result<UnixListener, ServerError> {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed stale registration endpoint"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let listener = UnixListener::bind(path)?;
    info!(path = %path.display(), "Listening for registrations");
    Ok(listener)
}
