//! In-memory transport.
//!
//! Channels are `tokio::io::duplex` pipes keyed by the paths in a setup
//! record, so a whole server can be exercised without touching the
//! filesystem.

use ems_core::SetupRequest;
use ems_runtime::{SessionChannels, Transport};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::io::{DuplexStream, duplex};

/// Pipe buffer size; large enough for any test frame
const PIPE_CAPACITY: usize = 64 * 1024;

/// Client ends of a session registered with a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryChannels {
    /// Client writes requests here
    pub requests: DuplexStream,
    /// Client reads responses here
    pub responses: DuplexStream,
}

/// A [`Transport`] over in-process pipes.
///
/// The client side calls [`listen`](Self::listen) for its setup record,
/// keeps the returned ends and registers the record with the server; a
/// worker's `open` then claims the server ends.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    listening: Arc<Mutex<HashMap<String, DuplexStream>>>,
}

impl MemoryTransport {
    /// Create a transport with no listening endpoints
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create both pipes for `setup` and return the client's ends
    #[must_use]
    pub fn listen(&self, setup: &SetupRequest) -> MemoryChannels {
        let (client_requests, server_requests) = duplex(PIPE_CAPACITY);
        let (server_responses, client_responses) = duplex(PIPE_CAPACITY);

        let mut listening = self.listening.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        listening.insert(setup.request_path().to_string(), server_requests);
        listening.insert(setup.response_path().to_string(), server_responses);

        MemoryChannels {
            requests: client_requests,
            responses: client_responses,
        }
    }

    /// Stop listening on `setup`'s paths, as a client that went away would
    pub fn forget(&self, setup: &SetupRequest) {
        let mut listening = self.listening.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        listening.remove(setup.request_path());
        listening.remove(setup.response_path());
    }

    /// Number of endpoints not yet claimed by a worker
    #[must_use]
    pub fn pending(&self) -> usize {
        self.listening
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn claim(&self, path: &str) -> io::Result<DuplexStream> {
        self.listening
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, format!("nothing listening on {path}")))
    }
}

impl Transport for MemoryTransport {
    fn open<'a>(
        &'a self,
        endpoints: &'a SetupRequest,
    ) -> Pin<Box<dyn Future<Output = io::Result<SessionChannels>> + Send + 'a>> {
        Box::pin(async move {
            let requests = self.claim(endpoints.request_path())?;
            let responses = self.claim(endpoints.response_path())?;
            Ok(SessionChannels {
                requests: Box::new(requests),
                responses: Box::new(responses),
            })
        })
    }
}
