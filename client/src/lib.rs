//! # EMS Client
//!
//! Client-side session API for the Event Management Service.
//!
//! A client registers two channels with the server, waits to be given a
//! session, and then issues requests one at a time. Every call blocks until
//! the matching response arrives.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ems_client::Client;
//! use ems_core::{EventId, Seat};
//!
//! # async fn example() -> Result<(), ems_client::ClientError> {
//! let mut client = Client::connect_unix("/tmp/c1.req", "/tmp/c1.resp", "/tmp/ems.sock").await?;
//! client.create(EventId::new(1), 10, 20).await?;
//! client.reserve(EventId::new(1), &[Seat::new(1, 1), Seat::new(1, 2)]).await?;
//! let grid = client.show(EventId::new(1)).await?;
//! println!("{:?}", grid.to_rows());
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::ClientError;

use ems_core::protocol::read_session_id;
use ems_core::{EventId, OpCode, Request, Response, Seat, SeatGrid, SessionId, SetupRequest, Status};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

/// Writable request channel
pub type RequestWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable response channel
pub type ResponseReader = Box<dyn AsyncRead + Send + Unpin>;

/// An active session with the server.
pub struct Client {
    session: SessionId,
    requests: RequestWriter,
    responses: ResponseReader,
    socket_files: Vec<PathBuf>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.session)
            .field("socket_files", &self.socket_files)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Register with the server over Unix-domain sockets.
    ///
    /// Listens on `request_path` and `response_path`, sends the setup record
    /// to `registration_path`, then waits until a worker connects and
    /// announces the session id. This waits for as long as every session
    /// slot is taken.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Protocol`] if a path is not a valid channel path
    /// - [`ClientError::Io`] if a socket cannot be bound or the server is
    ///   not listening
    /// - [`ClientError::Disconnected`] if the server closes the session
    ///   before announcing it
    pub async fn connect_unix(
        request_path: impl AsRef<Path>,
        response_path: impl AsRef<Path>,
        registration_path: impl AsRef<Path>,
    ) -> Result<Self, ClientError> {
        let request_path = request_path.as_ref();
        let response_path = response_path.as_ref();
        let setup = SetupRequest::new(path_str(request_path)?, path_str(response_path)?)?;

        remove_stale(request_path)?;
        remove_stale(response_path)?;
        let request_listener = UnixListener::bind(request_path)?;
        let response_listener = UnixListener::bind(response_path)?;
        let socket_files = vec![request_path.to_path_buf(), response_path.to_path_buf()];

        let mut registration = UnixStream::connect(registration_path.as_ref()).await?;
        setup.write_to(&mut registration).await?;
        registration.shutdown().await?;
        drop(registration);
        debug!(request_path = %request_path.display(), "Registered, waiting for a session");

        let (requests, _) = request_listener.accept().await?;
        let (responses, _) = response_listener.accept().await?;

        let mut client = Self::from_channels(requests, responses).await?;
        client.socket_files = socket_files;
        Ok(client)
    }

    /// Start a session over already-open channels by reading the session id
    /// the server announces.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] if the response channel closes
    /// before the id arrives.
    pub async fn from_channels<W, R>(requests: W, responses: R) -> Result<Self, ClientError>
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut responses: ResponseReader = Box::new(responses);
        let session = read_session_id(&mut responses).await?;
        debug!(session_id = %session, "Session started");
        Ok(Self {
            session,
            requests: Box::new(requests),
            responses,
            socket_files: Vec::new(),
        })
    }

    /// Session id the server assigned
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session
    }

    /// Create an event with a `rows` x `cols` grid.
    ///
    /// # Errors
    ///
    /// [`ClientError::Rejected`] with the server's status if it refused.
    pub async fn create(&mut self, event_id: EventId, rows: usize, cols: usize) -> Result<(), ClientError> {
        self.call(Request::Create { event_id, rows, cols }).await.map(drop)
    }

    /// Reserve every seat in `seats`, or none.
    ///
    /// # Errors
    ///
    /// [`ClientError::Rejected`] with the server's status if it refused.
    pub async fn reserve(&mut self, event_id: EventId, seats: &[Seat]) -> Result<(), ClientError> {
        self.call(Request::Reserve {
            event_id,
            seats: seats.to_vec(),
        })
        .await
        .map(drop)
    }

    /// Fetch an event's seat map.
    ///
    /// # Errors
    ///
    /// [`ClientError::Rejected`] with the server's status if it refused.
    pub async fn show(&mut self, event_id: EventId) -> Result<SeatGrid, ClientError> {
        match self.call(Request::Show { event_id }).await? {
            Response::Grid(grid) => Ok(grid),
            other => Err(unexpected(OpCode::Show, &other)),
        }
    }

    /// List every event id, in creation order.
    ///
    /// # Errors
    ///
    /// [`ClientError::Rejected`] with the server's status if it refused.
    pub async fn list_events(&mut self) -> Result<Vec<EventId>, ClientError> {
        match self.call(Request::List).await? {
            Response::Events(ids) => Ok(ids),
            other => Err(unexpected(OpCode::List, &other)),
        }
    }

    /// End the session and remove this client's socket files.
    ///
    /// # Errors
    ///
    /// Fails if the quit request cannot be sent. Socket files are removed
    /// either way.
    pub async fn quit(mut self) -> Result<(), ClientError> {
        let sent = Request::Quit.write_to(self.session, &mut self.requests).await;
        for path in &self.socket_files {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove socket file");
            }
        }
        debug!(session_id = %self.session, "Session closed");
        sent.map_err(ClientError::from)
    }

    async fn call(&mut self, request: Request) -> Result<Response, ClientError> {
        let opcode = request.opcode();
        request.write_to(self.session, &mut self.requests).await?;
        let response = Response::read_from(opcode, &mut self.responses).await?;
        match response.status() {
            Status::Ok => Ok(response),
            status => Err(ClientError::Rejected(status)),
        }
    }
}

fn path_str(path: &Path) -> Result<&str, ClientError> {
    path.to_str().ok_or_else(|| {
        ClientError::Protocol(ems_core::ProtocolError::InvalidPath(format!(
            "{} is not UTF-8",
            path.display()
        )))
    })
}

fn remove_stale(path: &Path) -> Result<(), ClientError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

fn unexpected(opcode: OpCode, response: &Response) -> ClientError {
    warn!(op = opcode.name(), ?response, "Response does not match request");
    ClientError::Protocol(ems_core::ProtocolError::UnexpectedOpcode(opcode))
}
