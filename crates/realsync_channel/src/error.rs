//! Error types for the channel adapter.

use realsync_core::SyncError;
use thiserror::Error;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur talking to a channel backend.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The backend could not be reached.
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// Opening the connection took too long.
    #[error("connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The connection is closed.
    #[error("connection closed")]
    Closed,

    /// The backend refused a channel.
    #[error("channel {channel} rejected: {reason}")]
    Rejected {
        /// Channel topic.
        channel: String,
        /// Reason given by the backend.
        reason: String,
    },

    /// A filter expression could not be parsed.
    #[error("invalid filter {expr:?}: {reason}")]
    InvalidFilter {
        /// The expression as given.
        expr: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A frame violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl ChannelError {
    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        ChannelError::Protocol(message.into())
    }

    /// Creates an invalid filter error.
    pub fn invalid_filter(expr: &str, reason: impl Into<String>) -> Self {
        ChannelError::InvalidFilter {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the connection may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChannelError::Unreachable(_) | ChannelError::Timeout(_) | ChannelError::Closed
        )
    }
}

impl From<ChannelError> for SyncError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Closed => SyncError::NotConnected,
            ChannelError::Codec(e) => SyncError::Codec(e),
            ChannelError::Protocol(message) => SyncError::Protocol(message),
            err if err.is_retryable() => SyncError::connect_retryable(err.to_string()),
            err => SyncError::connect_fatal(err.to_string()),
        }
    }
}
