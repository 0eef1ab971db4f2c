//! Registry of live subscriptions, keyed by local path.

use parking_lot::Mutex;
use realsync_core::CleanupHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One installed subscription.
///
/// The `active` flag is checked by the event callback before applying
/// anything, so deactivation silences the subscription even if the adapter
/// still holds the callback. `id` identifies the install so a stale handle
/// cannot remove a newer subscription for the same path.
pub(crate) struct ActiveSubscription {
    id: u64,
    active: Arc<AtomicBool>,
    handle: CleanupHandle,
}

impl ActiveSubscription {
    pub(crate) fn new(id: u64, active: Arc<AtomicBool>, handle: CleanupHandle) -> Self {
        Self { id, active, handle }
    }

    /// A placeholder for a path whose target could not be resolved.
    pub(crate) fn noop(id: u64) -> Self {
        Self {
            id,
            active: Arc::new(AtomicBool::new(false)),
            handle: CleanupHandle::noop(),
        }
    }

    fn release(self) {
        self.active.store(false, Ordering::SeqCst);
        self.handle.release();
    }
}

/// At most one subscription per path.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, ActiveSubscription>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stores `subscription` for `path`, releasing the one it replaces.
    pub(crate) fn insert(&self, path: &str, subscription: ActiveSubscription) -> bool {
        let previous = self.entries.lock().insert(path.to_string(), subscription);
        let replaced = previous.is_some();
        if let Some(previous) = previous {
            previous.release();
        }
        replaced
    }

    /// Releases and forgets the subscription for `path`.
    pub(crate) fn remove(&self, path: &str) -> bool {
        let removed = self.entries.lock().remove(path);
        match removed {
            Some(subscription) => {
                subscription.release();
                true
            }
            None => false,
        }
    }

    /// Releases and forgets the subscription for `path` if it is still install `id`.
    pub(crate) fn remove_if(&self, path: &str, id: u64) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            match entries.get(path) {
                Some(current) if current.id == id => entries.remove(path),
                _ => None,
            }
        };
        match removed {
            Some(subscription) => {
                subscription.release();
                true
            }
            None => false,
        }
    }

    /// Releases every subscription and returns how many there were.
    pub(crate) fn clear(&self) -> usize {
        let drained: Vec<ActiveSubscription> =
            self.entries.lock().drain().map(|(_, sub)| sub).collect();
        let count = drained.len();
        for subscription in drained {
            subscription.release();
        }
        count
    }

    /// Returns true if `path` has an installed subscription.
    pub(crate) fn contains(&self, path: &str) -> bool {
        self.entries.lock().contains_key(path)
    }

    /// Returns every path, sorted.
    pub(crate) fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.lock().keys().cloned().collect();
        paths.sort();
        paths
    }
}
