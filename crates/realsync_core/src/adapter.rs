//! Backend adapter contract.
//!
//! An adapter owns the connection to one change-notification backend and
//! turns its traffic into [`NormalizedEvent`]s. The orchestrator drives it
//! through [`Adapter`] only, so backends can be swapped without touching the
//! sync logic.

use crate::error::SyncResult;
use crate::event::{NormalizedEvent, TopicSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked once per delivered event.
pub type EventCallback = Arc<dyn Fn(NormalizedEvent) + Send + Sync>;

/// Callback invoked whenever connectivity changes.
pub type ConnectionCallback = Arc<dyn Fn(ConnectionChange) + Send + Sync>;

/// A connectivity notification from an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionChange {
    /// Whether the adapter is now connected.
    pub connected: bool,
    /// Why the connection was lost, if it was lost with an error.
    pub error: Option<String>,
}

impl ConnectionChange {
    /// The adapter became connected.
    pub fn connected() -> Self {
        Self {
            connected: true,
            error: None,
        }
    }

    /// The adapter lost its connection cleanly.
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            error: None,
        }
    }

    /// The adapter lost its connection because of an error.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            error: Some(error.into()),
        }
    }
}

/// Releases a subscription or listener when invoked.
///
/// Releasing takes effect immediately: once [`release`](Self::release)
/// returns, the associated callback is never invoked again. Dropping a handle
/// without releasing it leaves the registration in place.
pub struct CleanupHandle {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl CleanupHandle {
    /// Creates a handle that runs `release` once.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Creates a handle that does nothing.
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Returns true if releasing this handle does nothing.
    pub fn is_noop(&self) -> bool {
        self.release.is_none()
    }

    /// Runs the release action.
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for CleanupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupHandle")
            .field("noop", &self.is_noop())
            .finish()
    }
}

/// A backend integration.
///
/// Implementations must be safe to call from any task. Callbacks registered
/// through [`subscribe`](Self::subscribe) and
/// [`on_connection_change`](Self::on_connection_change) must be invoked
/// synchronously from the adapter's delivery path.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Opens the connection to the backend.
    async fn connect(&self) -> SyncResult<()>;

    /// Closes the connection. Idempotent and safe when already disconnected.
    fn disconnect(&self);

    /// Registers `on_event` for changes matching `spec`.
    ///
    /// Events for one subscription are delivered in backend order. There is
    /// no ordering guarantee across subscriptions.
    fn subscribe(&self, spec: &TopicSpec, on_event: EventCallback) -> CleanupHandle;

    /// Returns true if the adapter currently believes it is connected.
    fn is_connected(&self) -> bool;

    /// Registers the connectivity listener. Only the last registration is active.
    fn on_connection_change(&self, callback: ConnectionCallback) -> CleanupHandle;
}

/// Storage for the single connectivity listener of an adapter.
///
/// Registering replaces the previous listener. Releasing a stale handle does
/// not remove a newer listener.
#[derive(Clone, Default)]
pub struct ListenerSlot {
    current: Arc<Mutex<Option<(u64, ConnectionCallback)>>>,
    next_id: Arc<AtomicU64>,
}

impl ListenerSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `callback` as the active listener.
    pub fn register(&self, callback: ConnectionCallback) -> CleanupHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        *self.current.lock() = Some((id, callback));

        let current = Arc::downgrade(&self.current);
        CleanupHandle::new(move || {
            if let Some(current) = current.upgrade() {
                let mut slot = current.lock();
                if matches!(&*slot, Some((active, _)) if *active == id) {
                    *slot = None;
                }
            }
        })
    }

    /// Invokes the active listener, if any.
    ///
    /// The lock is not held during the call, so the listener may register or
    /// release listeners itself.
    pub fn notify(&self, change: ConnectionChange) {
        let callback = self
            .current
            .lock()
            .as_ref()
            .map(|(_, callback)| Arc::clone(callback));
        if let Some(callback) = callback {
            callback(change);
        }
    }

    /// Returns true if a listener is installed.
    pub fn is_registered(&self) -> bool {
        self.current.lock().is_some()
    }
}

impl fmt::Debug for ListenerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSlot")
            .field("registered", &self.is_registered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn cleanup_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = CleanupHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!handle.is_noop());
        handle.release();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        CleanupHandle::noop().release();
    }

    #[test]
    fn last_listener_wins() {
        let slot = ListenerSlot::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first_seen = Arc::clone(&seen);
        let first = slot.register(Arc::new(move |change: ConnectionChange| {
            first_seen.lock().push(("first", change.connected));
        }));
        let second_seen = Arc::clone(&seen);
        let _second = slot.register(Arc::new(move |change: ConnectionChange| {
            second_seen.lock().push(("second", change.connected));
        }));

        slot.notify(ConnectionChange::connected());
        assert_eq!(*seen.lock(), vec![("second", true)]);

        // Releasing the replaced listener must not remove the active one.
        first.release();
        assert!(slot.is_registered());
        slot.notify(ConnectionChange::disconnected());
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn released_listener_is_silent() {
        let slot = ListenerSlot::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = slot.register(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        handle.release();
        slot.notify(ConnectionChange::failed("reset by peer"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!slot.is_registered());
    }
}
