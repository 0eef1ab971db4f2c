//! Error types shared by the realsync crates.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while connecting to a backend or applying its events.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The adapter failed to establish a connection.
    #[error("connect failed: {message}")]
    Connect {
        /// Error message.
        message: String,
        /// Whether another attempt may succeed.
        retryable: bool,
    },

    /// A configured path does not resolve to an entity collection of the expected type.
    #[error("no sync target registered at path {path:?}")]
    SubscriptionTargetMissing {
        /// The configured local path.
        path: String,
    },

    /// An event lacks the payload its kind requires.
    #[error("malformed event on topic {topic:?}: {reason}")]
    MalformedEvent {
        /// Topic the event arrived on.
        topic: String,
        /// What was missing or invalid.
        reason: String,
    },

    /// Automatic reconnection gave up.
    #[error("max reconnect attempts reached")]
    MaxReconnectExceeded {
        /// Number of reconnect attempts made.
        attempts: u32,
    },

    /// The operation requires a live connection.
    #[error("not connected to backend")]
    NotConnected,

    /// The operation was abandoned because of a manual disconnect.
    #[error("sync cancelled")]
    Cancelled,

    /// The backend sent something the adapter cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl SyncError {
    /// Creates a retryable connect error.
    pub fn connect_retryable(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable connect error.
    pub fn connect_fatal(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a malformed event error.
    pub fn malformed(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Connect { retryable, .. } => *retryable,
            SyncError::NotConnected => true,
            _ => false,
        }
    }
}
