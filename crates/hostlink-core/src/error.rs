//! Error types shared by connectors and sessions.

use std::time::Duration;

use thiserror::Error;

use crate::Authority;

/// Failure reported by a transport collaborator.
///
/// Transports are opaque beyond this classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("credentials were rejected")]
    AuthenticationFailed,
    #[error("host unavailable: {0}")]
    Unavailable(String),
}

/// Error returned to callers of connectors and sessions.
#[derive(Debug, Error)]
pub enum HostError {
    /// Credentials rejected by the broker and no further attempts allowed.
    #[error("authentication failed for {authority}")]
    AuthenticationFailed { authority: String },
    /// The user aborted a credential prompt.
    #[error("operation canceled: {0}")]
    OperationCanceled(String),
    /// Host process or broker unreachable.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    /// A request was begun while another was pending.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("session has been disposed")]
    Disposed,
    #[error("host did not become ready within {0:?}")]
    Timeout(Duration),
    #[error("host is not running")]
    HostNotRunning,
    #[error("host is already running")]
    AlreadyRunning,
    #[error("configuration error: {0}")]
    Config(String),
}

impl HostError {
    /// Map a transport failure for the given authority.
    #[must_use]
    pub fn from_transport(err: TransportError, authority: &Authority) -> Self {
        match err {
            TransportError::AuthenticationFailed => Self::AuthenticationFailed {
                authority: authority.to_string(),
            },
            TransportError::Unavailable(msg) => Self::TransportUnavailable(msg),
        }
    }

    /// Whether the user canceled the operation.
    ///
    /// Front-ends use this to abandon session creation quietly instead of
    /// re-offering the prompt.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::OperationCanceled(_))
    }

    /// Whether the broker rejected the credentials.
    #[must_use]
    pub const fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }
}
