//! Error types for device sessions.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while opening a device session.
///
/// A failed open never leaves a half-open session behind.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// The device could not be reached (DNS, TCP, connect timeout).
    #[error("device unreachable: {0}")]
    Unreachable(String),

    /// The device rejected the credentials, or none could be resolved.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The transport misbehaved (unexpected banner, broken pipe, missing binary).
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ConnectError {
    /// Whether opening again might succeed.
    ///
    /// Rejected credentials will be rejected again, so they are not retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AuthFailed(_))
    }

    /// Human-readable message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Unreachable(m) | Self::AuthFailed(m) | Self::Protocol(m) => m,
        }
    }
}

/// Errors raised while executing one command on an open session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The device returned an error for the command.
    #[error("command failed: {0}")]
    Failed(String),

    /// The command did not complete within its timeout.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// The underlying connection dropped mid-command.
    #[error("session lost: {0}")]
    SessionLost(String),

    /// The device was never reached while sending the command.
    ///
    /// Raised by transports that connect lazily, where the first command is
    /// also the connection attempt.
    #[error(transparent)]
    Connect(ConnectError),
}

impl CommandError {
    /// Whether the session must be discarded after this error.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::SessionLost(_) | Self::Connect(_)
        )
    }
}

impl From<ConnectError> for CommandError {
    fn from(err: ConnectError) -> Self {
        Self::Connect(err)
    }
}
