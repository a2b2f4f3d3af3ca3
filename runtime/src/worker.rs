//! Fixed pool of session workers.
//!
//! Each worker loops: take the oldest pending session, open its channels,
//! announce its id, serve it, tear it down. The worker's index is the
//! session id it hands out, so ids are unique among active sessions and
//! reused once a session ends.

use crate::error::{ServerError, SessionError};
use crate::metrics::SessionMetrics;
use crate::queue::AdmissionQueue;
use crate::session::{PendingSession, Session, SessionEnd};
use crate::transport::Transport;
use ems_core::{ReservationEngine, SessionId};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The long-lived tasks that serve sessions.
#[derive(Debug)]
pub struct WorkerPool {
    queue: Arc<AdmissionQueue<PendingSession>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers consuming `queue`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        size: usize,
        queue: Arc<AdmissionQueue<PendingSession>>,
        engine: Arc<ReservationEngine>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let workers = (0..size)
            .map(|index| {
                let worker = Worker {
                    id: SessionId::new(u32::try_from(index).unwrap_or(u32::MAX)),
                    queue: Arc::clone(&queue),
                    engine: Arc::clone(&engine),
                    transport: Arc::clone(&transport),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        info!(workers = size, "Worker pool started");
        Self { queue, workers }
    }

    /// Number of workers
    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop taking new sessions and wait for the workers to finish.
    ///
    /// Queued sessions are still served. Workers still busy when `timeout`
    /// expires are aborted.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ShutdownTimeout`] with the number of workers
    /// that had to be aborted.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), ServerError> {
        info!("Shutting down worker pool");
        self.queue.close();

        let aborts: Vec<_> = self.workers.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, join_all(self.workers)).await.is_ok() {
            info!("All workers stopped");
            return Ok(());
        }

        let running = aborts.iter().filter(|handle| !handle.is_finished()).count();
        for handle in &aborts {
            handle.abort();
        }
        error!(running, "Shutdown timeout: aborting busy workers");
        Err(ServerError::ShutdownTimeout(running))
    }
}

struct Worker {
    id: SessionId,
    queue: Arc<AdmissionQueue<PendingSession>>,
    engine: Arc<ReservationEngine>,
    transport: Arc<dyn Transport>,
}

impl Worker {
    async fn run(self) {
        while let Some(pending) = self.queue.dequeue().await {
            self.handle(pending).await;
        }
        debug!(worker = %self.id, "Admission queue closed, worker exiting");
    }

    async fn handle(&self, pending: PendingSession) {
        let waited = pending.queued_at().elapsed();
        // The permit is held until this function returns, after the
        // channels are closed.
        let (endpoints, _permit) = pending.into_parts();

        let channels = match self.transport.open(&endpoints).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(
                    session_id = %self.id,
                    request_path = endpoints.request_path(),
                    error = %e,
                    "Client gone before activation"
                );
                return;
            }
        };

        let mut session = Session::new(self.id, &self.engine, channels);
        if let Err(e) = session.announce().await {
            warn!(session_id = %self.id, error = %e, "Failed to announce session id");
            return;
        }
        SessionMetrics::record_started();
        info!(
            session_id = %self.id,
            request_path = endpoints.request_path(),
            response_path = endpoints.response_path(),
            waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
            "Session activated"
        );

        match session.serve().await {
            Ok(SessionEnd::Quit) => info!(session_id = %self.id, "Session ended by client"),
            Ok(SessionEnd::Closed) | Err(SessionError::Disconnected) => {
                info!(session_id = %self.id, "Client disconnected");
            }
            Err(SessionError::Protocol(e)) => {
                warn!(session_id = %self.id, error = %e, "Protocol error, terminating session");
            }
            Err(e @ SessionError::Fatal(_)) => {
                error!(session_id = %self.id, error = %e, "Session channel failed");
            }
        }
        drop(session);
    }
}
