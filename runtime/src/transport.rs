//! Opening a session's byte channels.
//!
//! A registration names two channels by path; a [`Transport`] turns those
//! names into a readable request stream and a writable response stream.

use ems_core::SetupRequest;
use std::future::Future;
use std::io;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;

/// Readable half of a session: client-to-server requests
pub type RequestChannel = Box<dyn AsyncRead + Send + Unpin>;

/// Writable half of a session: server-to-client responses
pub type ResponseChannel = Box<dyn AsyncWrite + Send + Unpin>;

/// Both channels of an active session.
pub struct SessionChannels {
    /// Requests from the client
    pub requests: RequestChannel,
    /// Responses to the client
    pub responses: ResponseChannel,
}

impl std::fmt::Debug for SessionChannels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionChannels").finish_non_exhaustive()
    }
}

/// Opens the channels a setup record names.
///
/// # Implementations
///
/// - **[`UnixTransport`]** (production): Unix-domain stream sockets
/// - **`MemoryTransport`** in `ems-testing`: in-process pipes for tests
///
/// # Dyn Compatibility
///
/// `open` returns an explicit `Pin<Box<dyn Future>>` so workers can share an
/// `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    /// Open the request channel, then the response channel.
    ///
    /// # Errors
    ///
    /// Fails if either channel cannot be opened, typically because the
    /// client is gone.
    fn open<'a>(
        &'a self,
        endpoints: &'a SetupRequest,
    ) -> Pin<Box<dyn Future<Output = io::Result<SessionChannels>> + Send + 'a>>;
}

/// Channels over Unix-domain stream sockets.
///
/// The client listens on both of its paths before registering; the worker
/// connects to each. Every stream is used in one direction only.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixTransport;

impl Transport for UnixTransport {
    fn open<'a>(
        &'a self,
        endpoints: &'a SetupRequest,
    ) -> Pin<Box<dyn Future<Output = io::Result<SessionChannels>> + Send + 'a>> {
        Box::pin(async move {
            let requests = UnixStream::connect(endpoints.request_path()).await?;
            let responses = UnixStream::connect(endpoints.response_path()).await?;
            Ok(SessionChannels {
                requests: Box::new(requests),
                responses: Box::new(responses),
            })
        })
    }
}
