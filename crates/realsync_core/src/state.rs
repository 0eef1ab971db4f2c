//! Connection state machine.
//!
//! The state is a single observable cell: every mutation publishes a new
//! [`ConnectionSnapshot`] to `watch` receivers, so hosts can react to status
//! changes without polling.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Status of the connection to the change-notification backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    /// Not connected. Initial state and the result of a manual disconnect.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected and receiving events.
    Connected,
    /// The last attempt failed or the connection was lost with an error.
    Error,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
}

impl ConnectionStatus {
    /// Returns the lowercase name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Reconnecting => "reconnecting",
        }
    }

    /// Returns true while a connection is being (re-)established.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting | ConnectionStatus::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point-in-time copy of the connection state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionSnapshot {
    /// Current status.
    pub status: ConnectionStatus,
    /// Last error message, if any.
    pub error: Option<String>,
    /// When the connection last reached [`ConnectionStatus::Connected`].
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
}

impl ConnectionSnapshot {
    /// Returns true if the status is [`ConnectionStatus::Connected`].
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Connection state owned by one orchestrator.
///
/// Invariants:
/// - entering `Connected` clears the error, resets the attempt counter and
///   stamps `last_connected_at`
/// - setting an error forces `Error`
///
/// The mutators are meant for the orchestrator that owns the state; other
/// parties should hold a [`ConnectionStateView`].
#[derive(Debug)]
pub struct ConnectionState {
    cell: watch::Sender<ConnectionSnapshot>,
}

impl ConnectionState {
    /// Creates a new state in [`ConnectionStatus::Disconnected`].
    pub fn new() -> Self {
        let (cell, _) = watch::channel(ConnectionSnapshot::default());
        Self { cell }
    }

    /// Gets the current status.
    pub fn status(&self) -> ConnectionStatus {
        self.cell.borrow().status
    }

    /// Gets the last error message.
    pub fn error(&self) -> Option<String> {
        self.cell.borrow().error.clone()
    }

    /// Returns true if connected.
    pub fn is_connected(&self) -> bool {
        self.cell.borrow().is_connected()
    }

    /// Gets the time of the last successful connection.
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        self.cell.borrow().last_connected_at
    }

    /// Gets the number of reconnect attempts since the last connection.
    pub fn reconnect_attempts(&self) -> u32 {
        self.cell.borrow().reconnect_attempts
    }

    /// Returns a copy of every field.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.cell.borrow().clone()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.cell.subscribe()
    }

    /// Sets the status.
    ///
    /// Moving to `Connected` also clears the error, resets the attempt
    /// counter and records the connection time.
    pub fn set_status(&self, status: ConnectionStatus) {
        let mut previous = status;
        self.cell.send_modify(|state| {
            previous = state.status;
            state.status = status;
            if status == ConnectionStatus::Connected {
                state.error = None;
                state.reconnect_attempts = 0;
                state.last_connected_at = Some(Utc::now());
            }
        });
        if previous != status {
            debug!(from = %previous, to = %status, "connection status changed");
        }
    }

    /// Sets or clears the error.
    ///
    /// `Some` forces the status to `Error`; `None` leaves the status alone.
    pub fn set_error(&self, error: Option<String>) {
        self.cell.send_modify(|state| {
            if error.is_some() {
                state.status = ConnectionStatus::Error;
            }
            state.error = error;
        });
    }

    /// Increments the reconnect counter and returns the new value.
    pub fn increment_reconnect_attempts(&self) -> u32 {
        let mut attempts = 0;
        self.cell.send_modify(|state| {
            state.reconnect_attempts = state.reconnect_attempts.saturating_add(1);
            attempts = state.reconnect_attempts;
        });
        attempts
    }

    /// Resets the reconnect counter to zero.
    pub fn reset_reconnect_attempts(&self) {
        self.cell.send_modify(|state| state.reconnect_attempts = 0);
    }

    /// Records the time of the last successful connection.
    pub fn set_last_connected_at(&self, at: DateTime<Utc>) {
        self.cell
            .send_modify(|state| state.last_connected_at = Some(at));
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only handle to a [`ConnectionState`].
#[derive(Debug, Clone)]
pub struct ConnectionStateView {
    state: Arc<ConnectionState>,
}

impl ConnectionStateView {
    /// Wraps shared state in a read-only view.
    pub fn new(state: Arc<ConnectionState>) -> Self {
        Self { state }
    }

    /// Gets the current status.
    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    /// Gets the last error message.
    pub fn error(&self) -> Option<String> {
        self.state.error()
    }

    /// Returns true if connected.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Gets the time of the last successful connection.
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        self.state.last_connected_at()
    }

    /// Gets the number of reconnect attempts since the last connection.
    pub fn reconnect_attempts(&self) -> u32 {
        self.state.reconnect_attempts()
    }

    /// Returns a copy of every field.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.state.snapshot()
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.state.subscribe()
    }

    /// Waits until the state satisfies `predicate` and returns that state.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&ConnectionSnapshot) -> bool,
    ) -> ConnectionSnapshot {
        let mut rx = self.state.subscribe();
        let matched = rx.wait_for(|state| predicate(state)).await.map(|s| (*s).clone());
        // The view keeps the sender alive, so the channel cannot close here.
        matched.unwrap_or_else(|_| self.state.snapshot())
    }

    /// Waits until the status equals `status`.
    pub async fn wait_for_status(&self, status: ConnectionStatus) -> ConnectionSnapshot {
        self.wait_for(|state| state.status == status).await
    }
}
