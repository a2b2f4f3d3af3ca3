//! Error types for sessions, admission and the server.

use ems_core::ProtocolError;
use std::io;
use thiserror::Error;

/// Why a session stopped being served.
///
/// None of these affect other sessions; the worker logs the error, frees the
/// session's slot and picks up the next queued session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The client closed or broke a channel
    #[error("Client disconnected")]
    Disconnected,

    /// The client sent a malformed or unexpected frame
    #[error("Protocol violation: {0}")]
    Protocol(ProtocolError),

    /// A channel failed for a reason other than the peer leaving
    #[error("Channel failure: {0}")]
    Fatal(#[source] io::Error),
}

impl From<ProtocolError> for SessionError {
    fn from(error: ProtocolError) -> Self {
        if error.is_disconnect() {
            return Self::Disconnected;
        }
        match error {
            ProtocolError::Io(e) => Self::Fatal(e),
            other => Self::Protocol(other),
        }
    }
}

/// Errors from [`SessionAdmission`](crate::admission::SessionAdmission) and
/// [`AdmissionQueue`](crate::queue::AdmissionQueue).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Every session slot is taken
    #[error("All {max} session slots are in use")]
    Capacity {
        /// Configured number of slots
        max: usize,
    },

    /// The server is shutting down
    #[error("Admission is closed")]
    Closed,
}

/// Errors from the server's registration and lifecycle.
#[derive(Error, Debug)]
pub enum ServerError {
    /// A setup record could not be read or decoded
    #[error("Invalid registration: {0}")]
    Registration(#[from] ProtocolError),

    /// A registration could not be admitted
    #[error("Admission failed: {0}")]
    Admission(#[from] AdmissionError),

    /// The registration endpoint could not be created or accepted on
    #[error("Registration endpoint failed: {0}")]
    Endpoint(#[from] io::Error),

    /// The setup record did not arrive in time
    #[error("Timed out waiting for a setup record")]
    RegistrationTimeout,

    /// Workers were still serving sessions when the shutdown timeout expired
    #[error("Shutdown timeout: {0} workers still running")]
    ShutdownTimeout(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_classify() {
        assert!(matches!(
            SessionError::from(ProtocolError::Io(io::ErrorKind::BrokenPipe.into())),
            SessionError::Disconnected
        ));
        assert!(matches!(
            SessionError::from(ProtocolError::Io(io::ErrorKind::PermissionDenied.into())),
            SessionError::Fatal(_)
        ));
        assert!(matches!(
            SessionError::from(ProtocolError::Truncated),
            SessionError::Protocol(ProtocolError::Truncated)
        ));
        assert!(matches!(
            SessionError::from(ProtocolError::UnknownOpcode(9)),
            SessionError::Protocol(ProtocolError::UnknownOpcode(9))
        ));
    }
}
