//! Test servers and engine builders.

use crate::mocks::{MemoryChannels, MemoryTransport};
use ems_client::{Client, ClientError};
use ems_core::protocol::read_session_id;
use ems_core::{EngineConfig, EventId, ProtocolError, ReservationEngine, SessionId, SetupRequest};
use ems_runtime::{Server, ServerConfig, ServerError};
use futures::future::try_join_all;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Engine with no access delay
#[must_use]
pub fn test_engine() -> ReservationEngine {
    ReservationEngine::new(EngineConfig::default())
}

/// Engine that sleeps `delay` on every lookup and seat access, to widen race
/// windows
#[must_use]
pub fn slow_engine(delay: Duration) -> Arc<ReservationEngine> {
    Arc::new(ReservationEngine::new(
        EngineConfig::default().with_access_delay(delay),
    ))
}

/// Engine pre-populated with `events`, each given as `(id, rows, cols)`.
///
/// # Errors
///
/// Fails if any event cannot be created.
pub async fn engine_with_events(
    events: &[(u32, usize, usize)],
) -> Result<ReservationEngine, ems_core::EngineError> {
    let engine = test_engine();
    for &(id, rows, cols) in events {
        engine.create(EventId::new(id), rows, cols).await?;
    }
    Ok(engine)
}

/// A full server on a [`MemoryTransport`].
///
/// # Example
///
/// ```
/// use ems_core::EventId;
/// use ems_testing::TestServer;
///
/// # tokio_test::block_on(async {
/// let server = TestServer::with_max_sessions(2);
/// let mut client = server.connect().await.unwrap();
/// client.create(EventId::new(1), 2, 2).await.unwrap();
/// assert_eq!(client.list_events().await.unwrap(), vec![EventId::new(1)]);
/// client.quit().await.unwrap();
/// # });
/// ```
#[derive(Debug)]
pub struct TestServer {
    server: Server,
    transport: MemoryTransport,
    next_client: AtomicU64,
}

impl TestServer {
    /// Start a server with `config`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(config: &ServerConfig) -> Self {
        let transport = MemoryTransport::new();
        let server = Server::start(config, Arc::new(transport.clone()));
        Self {
            server,
            transport,
            next_client: AtomicU64::new(1),
        }
    }

    /// Start a server with default engine settings and `max_sessions` slots
    #[must_use]
    pub fn with_max_sessions(max_sessions: usize) -> Self {
        Self::start(&ServerConfig::default().with_max_sessions(max_sessions))
    }

    /// The underlying server
    #[must_use]
    pub const fn server(&self) -> &Server {
        &self.server
    }

    /// The server's engine
    #[must_use]
    pub fn engine(&self) -> &ReservationEngine {
        self.server.engine()
    }

    /// The transport clients connect through
    #[must_use]
    pub const fn transport(&self) -> &MemoryTransport {
        &self.transport
    }

    /// A setup record with paths no other client of this server uses.
    ///
    /// # Errors
    ///
    /// Fails only if the generated paths outgrow the channel path limit.
    pub fn endpoints(&self) -> Result<SetupRequest, ProtocolError> {
        let n = self.next_client.fetch_add(1, Ordering::Relaxed);
        SetupRequest::new(format!("/mem/{n}.req"), format!("/mem/{n}.resp"))
    }

    /// Register a client and wait until it is given a session.
    ///
    /// # Errors
    ///
    /// Fails if the server is shutting down or closes the session before
    /// announcing it.
    pub async fn connect(&self) -> Result<Client, ClientError> {
        let channels = self.register().await?;
        Client::from_channels(channels.requests, channels.responses).await
    }

    /// Connect `n` clients concurrently.
    ///
    /// # Errors
    ///
    /// Fails if any connection fails.
    pub async fn connect_many(&self, n: usize) -> Result<Vec<Client>, ClientError> {
        try_join_all((0..n).map(|_| self.connect())).await
    }

    /// Register a client, wait for its session and return the raw channels,
    /// for tests that write frames by hand.
    ///
    /// # Errors
    ///
    /// Fails like [`connect`](Self::connect).
    pub async fn connect_raw(&self) -> Result<(SessionId, MemoryChannels), ClientError> {
        let mut channels = self.register().await?;
        let session = read_session_id(&mut channels.responses).await?;
        Ok((session, channels))
    }

    async fn register(&self) -> Result<MemoryChannels, ClientError> {
        let setup = self.endpoints()?;
        let channels = self.transport.listen(&setup);
        self.server.admit(setup).await.map_err(refused)?;
        Ok(channels)
    }

    /// Shut the server down, waiting up to `timeout` for sessions to end.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ShutdownTimeout`] if sessions were still active.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), ServerError> {
        self.server.shutdown(timeout).await
    }
}

fn refused(error: ServerError) -> ClientError {
    match error {
        ServerError::Registration(e) => ClientError::Protocol(e),
        other => ClientError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, other.to_string())),
    }
}

/// Install a fmt subscriber honoring `RUST_LOG`, once per process.
///
/// Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
