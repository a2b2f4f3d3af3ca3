//! Client error type.

use ems_core::{ProtocolError, Status};
use std::io;
use thiserror::Error;

/// Errors returned by [`Client`](crate::Client) calls.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A socket could not be bound, connected or accepted
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server sent something unexpected
    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    /// The server refused the operation
    #[error("Request rejected: {0}")]
    Rejected(Status),

    /// The server closed the session
    #[error("Server disconnected")]
    Disconnected,
}

impl ClientError {
    /// The rejection status, if the server refused the operation
    #[must_use]
    pub const fn status(&self) -> Option<Status> {
        match self {
            Self::Rejected(status) => Some(*status),
            _ => None,
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(error: ProtocolError) -> Self {
        if error.is_disconnect() || matches!(error, ProtocolError::Truncated) {
            Self::Disconnected
        } else {
            Self::Protocol(error)
        }
    }
}
