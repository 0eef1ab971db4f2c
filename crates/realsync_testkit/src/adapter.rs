//! A scriptable in-memory adapter.
//!
//! [`ScriptedAdapter`] stands in for a backend in orchestrator tests. Connect
//! attempts can be made to fail, connections dropped, and events emitted to
//! whatever is subscribed.

use async_trait::async_trait;
use parking_lot::Mutex;
use realsync_core::{
    Adapter, CleanupHandle, ConnectionCallback, ConnectionChange, EventCallback, ListenerSlot,
    NormalizedEvent, SyncError, SyncResult, TopicSpec,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Message carried by scripted connect failures.
pub const SCRIPTED_FAILURE: &str = "scripted connect failure";

#[derive(Debug, Default)]
struct Script {
    failures_remaining: u32,
    always_fail: bool,
}

struct Registered {
    id: u64,
    spec: TopicSpec,
    on_event: EventCallback,
}

/// In-memory adapter with failure injection.
///
/// Connect outcomes are reported to the connectivity listener before
/// `connect` returns, like a socket client would. Event delivery ignores
/// connectivity so tests can probe late deliveries.
pub struct ScriptedAdapter {
    listener: ListenerSlot,
    connected: AtomicBool,
    script: Mutex<Script>,
    latency: Option<Duration>,
    lax_cleanup: bool,
    connect_log: Mutex<Vec<Instant>>,
    subscriptions: Arc<Mutex<Vec<Registered>>>,
    next_id: AtomicU64,
    disconnects: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl ScriptedAdapter {
    /// Creates an adapter whose connects succeed.
    pub fn new() -> Self {
        Self {
            listener: ListenerSlot::new(),
            connected: AtomicBool::new(false),
            script: Mutex::new(Script::default()),
            latency: None,
            lax_cleanup: false,
            connect_log: Mutex::new(Vec::new()),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
            disconnects: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates an adapter whose first `failures` connects fail.
    pub fn failing(failures: u32) -> Self {
        let adapter = Self::new();
        adapter.fail_next(failures);
        adapter
    }

    /// Creates an adapter whose connects always fail.
    pub fn always_failing() -> Self {
        let adapter = Self::new();
        adapter.set_always_fail(true);
        adapter
    }

    /// Makes every connect wait `latency` before resolving.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes released subscription handles keep delivering events.
    ///
    /// Models a backend whose unsubscribe is not immediate.
    pub fn with_lax_cleanup(mut self) -> Self {
        self.lax_cleanup = true;
        self
    }

    /// Makes the next `failures` connects fail.
    pub fn fail_next(&self, failures: u32) {
        self.script.lock().failures_remaining += failures;
    }

    /// Makes every connect fail until switched off.
    pub fn set_always_fail(&self, always_fail: bool) {
        self.script.lock().always_fail = always_fail;
    }

    /// Drops an established connection.
    ///
    /// With an error the listener sees a failure, otherwise a clean close.
    pub fn drop_connection(&self, error: Option<&str>) {
        self.connected.store(false, Ordering::SeqCst);
        let change = match error {
            Some(error) => ConnectionChange::failed(error),
            None => ConnectionChange::disconnected(),
        };
        self.listener.notify(change);
    }

    /// Delivers `event` to every matching subscription.
    ///
    /// Returns the number of callbacks invoked.
    pub fn emit(&self, event: NormalizedEvent) -> usize {
        let targets: Vec<EventCallback> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| {
                s.spec.covers(event.namespace.as_deref(), &event.topic)
                    && s.spec.event_filter.matches(event.kind)
            })
            .map(|s| Arc::clone(&s.on_event))
            .collect();

        for on_event in &targets {
            on_event(event.clone());
        }
        targets.len()
    }

    /// Returns the number of connect calls so far.
    pub fn connect_calls(&self) -> usize {
        self.connect_log.lock().len()
    }

    /// Returns when each connect call started.
    pub fn connect_times(&self) -> Vec<Instant> {
        self.connect_log.lock().clone()
    }

    /// Returns the number of disconnect calls so far.
    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Returns the number of subscriptions still receiving events.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Returns the qualified topics of live subscriptions.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .iter()
            .map(|s| s.spec.qualified_name())
            .collect()
    }

    /// Returns the number of subscription handles released.
    pub fn released_handles(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Returns true if a connectivity listener is installed.
    pub fn has_listener(&self) -> bool {
        self.listener.is_registered()
    }
}

impl Default for ScriptedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    async fn connect(&self) -> SyncResult<()> {
        self.connect_log.lock().push(Instant::now());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let fail = {
            let mut script = self.script.lock();
            if script.always_fail {
                true
            } else if script.failures_remaining > 0 {
                script.failures_remaining -= 1;
                true
            } else {
                false
            }
        };

        if fail {
            debug!(call = self.connect_calls(), "scripted connect failing");
            self.connected.store(false, Ordering::SeqCst);
            self.listener.notify(ConnectionChange::failed(SCRIPTED_FAILURE));
            return Err(SyncError::connect_retryable(SCRIPTED_FAILURE));
        }

        self.connected.store(true, Ordering::SeqCst);
        self.listener.notify(ConnectionChange::connected());
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn subscribe(&self, spec: &TopicSpec, on_event: EventCallback) -> CleanupHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().push(Registered {
            id,
            spec: spec.clone(),
            on_event,
        });

        let released = Arc::clone(&self.released);
        if self.lax_cleanup {
            return CleanupHandle::new(move || {
                released.fetch_add(1, Ordering::SeqCst);
            });
        }

        let subscriptions = Arc::downgrade(&self.subscriptions);
        CleanupHandle::new(move || {
            released.fetch_add(1, Ordering::SeqCst);
            if let Some(subscriptions) = subscriptions.upgrade() {
                subscriptions.lock().retain(|s| s.id != id);
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn on_connection_change(&self, callback: ConnectionCallback) -> CleanupHandle {
        self.listener.register(callback)
    }
}
