//! The sync orchestrator.
//!
//! Owns the connection state, drives the adapter through connect and
//! reconnect, and applies delivered events to the configured targets.

use crate::binding::{Applied, Applier, Binding};
use crate::config::{SyncConfig, SyncOptions};
use crate::registry::{ActiveSubscription, SubscriptionRegistry};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use realsync_core::{
    Adapter, CleanupHandle, ConnectionChange, ConnectionState, ConnectionStateView,
    ConnectionStatus, EventCallback, NormalizedEvent, SubscriptionDescriptor, SyncError,
    SyncResult, TargetRegistry,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counters describing what the orchestrator has done.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Successful connects.
    pub connects: u64,
    /// Failed connect attempts.
    pub failed_connects: u64,
    /// Reconnect timers armed.
    pub reconnects_scheduled: u64,
    /// Events applied to a target.
    pub events_applied: u64,
    /// Events dropped as malformed.
    pub events_dropped: u64,
    /// Commit time of the last applied event.
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Keeps local entity collections in sync with a backend through an [`Adapter`].
///
/// Dropping the orchestrator tears it down like [`disconnect`](Self::disconnect).
pub struct SyncOrchestrator<A: Adapter> {
    inner: Arc<Inner<A>>,
}

/// A subscription added through `subscribe`, with the install id its handle owns.
#[derive(Clone)]
struct DynamicSubscription {
    path: String,
    binding: Arc<dyn Binding>,
    id: u64,
}

struct Inner<A: Adapter> {
    adapter: Arc<A>,
    options: SyncOptions,
    targets: Arc<TargetRegistry>,
    configured: Vec<(String, Arc<dyn Binding>)>,
    /// Subscriptions added through `subscribe`, reinstalled after automatic reconnects.
    dynamic: Mutex<Vec<DynamicSubscription>>,
    next_subscription_id: AtomicU64,
    state: Arc<ConnectionState>,
    subscriptions: SubscriptionRegistry,
    connection_listener: Mutex<Option<CleanupHandle>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    manual_disconnect: AtomicBool,
    /// Serializes connect attempts.
    connect_gate: tokio::sync::Mutex<()>,
    stats: RwLock<SyncStats>,
}

impl<A: Adapter> SyncOrchestrator<A> {
    /// Creates an orchestrator and schedules the first connect attempt.
    ///
    /// A failure of that first attempt is logged and recorded in the
    /// connection state, never returned.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(adapter: Arc<A>, config: SyncConfig, options: SyncOptions) -> Self {
        let (targets, configured) = config.into_parts();
        let inner = Arc::new(Inner {
            adapter,
            options,
            targets,
            configured,
            dynamic: Mutex::new(Vec::new()),
            next_subscription_id: AtomicU64::new(0),
            state: Arc::new(ConnectionState::new()),
            subscriptions: SubscriptionRegistry::new(),
            connection_listener: Mutex::new(None),
            reconnect_timer: Mutex::new(None),
            manual_disconnect: AtomicBool::new(false),
            connect_gate: tokio::sync::Mutex::new(()),
            stats: RwLock::new(SyncStats::default()),
        });

        let startup = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let Some(inner) = startup.upgrade() else {
                return;
            };
            if let Err(e) = inner.connect().await {
                warn!(error = %e, "initial connect failed");
            }
        });

        Self { inner }
    }

    /// Returns a read-only view of the connection state.
    pub fn connection(&self) -> ConnectionStateView {
        ConnectionStateView::new(Arc::clone(&self.inner.state))
    }

    /// Returns the adapter.
    pub fn adapter(&self) -> &Arc<A> {
        &self.inner.adapter
    }

    /// Returns the options.
    pub fn options(&self) -> &SyncOptions {
        &self.inner.options
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Returns true while a reconnect timer is armed.
    pub fn has_pending_reconnect(&self) -> bool {
        self.inner.reconnect_pending()
    }

    /// Returns the paths with an installed subscription, sorted.
    pub fn subscribed_paths(&self) -> Vec<String> {
        self.inner.subscriptions.paths()
    }

    /// Returns true if `path` has an installed subscription.
    pub fn is_subscribed(&self, path: &str) -> bool {
        self.inner.subscriptions.contains(path)
    }

    /// Disconnects, resets the attempt counter and connects again.
    ///
    /// Unlike automatic reconnects, a failure is returned to the caller.
    pub async fn reconnect(&self) -> SyncResult<()> {
        self.inner.disconnect();
        self.inner.state.reset_reconnect_attempts();
        self.inner.connect().await
    }

    /// Stops syncing.
    ///
    /// Cancels a pending reconnect, releases every subscription and the
    /// connectivity listener, and closes the adapter. Events the backend
    /// delivers afterwards are ignored.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Subscribes `path` to the topic described by `descriptor`.
    ///
    /// Requires a live connection; otherwise a warning is logged and a no-op
    /// handle returned. An existing subscription for `path` is released first.
    /// The subscription is reinstalled after automatic reconnects until
    /// [`unsubscribe`](Self::unsubscribe) or [`disconnect`](Self::disconnect).
    /// Releasing the returned handle unsubscribes `path` unless a later
    /// `subscribe` for the same path replaced it.
    pub fn subscribe<E>(
        &self,
        path: impl Into<String>,
        descriptor: SubscriptionDescriptor<E>,
    ) -> CleanupHandle
    where
        E: Send + Sync + 'static,
    {
        let path = path.into();
        if !self.inner.adapter.is_connected() {
            warn!(path = %path, topic = descriptor.topic(), "cannot subscribe while disconnected");
            return CleanupHandle::noop();
        }

        let binding: Arc<dyn Binding> = Arc::new(descriptor);
        let id = self.inner.next_id();
        self.inner.remember(&path, Arc::clone(&binding), id);
        self.inner.install(&path, &binding, id);

        let inner = Arc::downgrade(&self.inner);
        CleanupHandle::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.release_subscription(&path, id);
            }
        })
    }

    /// Releases the subscription for `path`. Returns true if there was one.
    pub fn unsubscribe(&self, path: &str) -> bool {
        self.inner.unsubscribe(path)
    }
}

impl<A: Adapter> Drop for SyncOrchestrator<A> {
    fn drop(&mut self) {
        self.inner.disconnect();
    }
}

impl<A: Adapter> Inner<A> {
    async fn connect(self: &Arc<Self>) -> SyncResult<()> {
        let _gate = self.connect_gate.lock().await;

        self.state.set_status(ConnectionStatus::Connecting);
        self.manual_disconnect.store(false, Ordering::SeqCst);
        self.install_connection_listener();
        debug!("connecting");

        match self.adapter.connect().await {
            Ok(()) => {
                if self.manual_disconnect.load(Ordering::SeqCst) {
                    debug!("disconnected while connecting, discarding connection");
                    self.adapter.disconnect();
                    return Err(SyncError::Cancelled);
                }
                let installed = self.install_all();
                self.state.set_status(ConnectionStatus::Connected);
                self.stats.write().connects += 1;
                info!(subscriptions = installed, "connected");
                Ok(())
            }
            Err(e) => {
                self.stats.write().failed_connects += 1;
                if self.manual_disconnect.load(Ordering::SeqCst) {
                    return Err(e);
                }
                warn!(error = %e, "connect failed");
                // Still Connecting means the adapter did not report the
                // failure through the listener.
                if self.state.status() == ConnectionStatus::Connecting {
                    self.handle_connection_change(ConnectionChange::failed(e.to_string()));
                }
                Err(e)
            }
        }
    }

    fn install_connection_listener(self: &Arc<Self>) {
        let previous = self.connection_listener.lock().take();
        if let Some(previous) = previous {
            previous.release();
        }

        let inner = Arc::downgrade(self);
        let handle = self
            .adapter
            .on_connection_change(Arc::new(move |change: ConnectionChange| {
                if let Some(inner) = inner.upgrade() {
                    inner.handle_connection_change(change);
                }
            }));
        *self.connection_listener.lock() = Some(handle);
    }

    fn handle_connection_change(self: &Arc<Self>, change: ConnectionChange) {
        if change.connected {
            self.state.set_status(ConnectionStatus::Connected);
            return;
        }

        match change.error {
            Some(error) => {
                debug!(error = %error, "connection lost");
                self.state.set_error(Some(error));
            }
            None => {
                debug!("connection closed");
                self.state.set_status(ConnectionStatus::Disconnected);
            }
        }

        if self.options.auto_reconnect && !self.manual_disconnect.load(Ordering::SeqCst) {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let mut timer = self.reconnect_timer.lock();
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("reconnect already scheduled");
            return;
        }

        let attempts = self.state.reconnect_attempts();
        if attempts >= self.options.max_reconnect_attempts {
            *timer = None;
            let err = SyncError::MaxReconnectExceeded { attempts };
            warn!(attempts, "giving up on reconnecting");
            self.state.set_error(Some(err.to_string()));
            return;
        }

        let delay = self.options.delay_for_attempt(attempts);
        self.state.set_status(ConnectionStatus::Reconnecting);
        let attempt = self.state.increment_reconnect_attempts();
        self.stats.write().reconnects_scheduled += 1;
        info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        let inner: Weak<Self> = Arc::downgrade(self);
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            // Free the slot first so a failure below can arm the next attempt.
            inner.reconnect_timer.lock().take();
            if let Err(e) = inner.connect().await {
                debug!(error = %e, "scheduled reconnect failed");
            }
        }));
    }

    fn reconnect_pending(&self) -> bool {
        self.reconnect_timer
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    fn disconnect(&self) {
        self.manual_disconnect.store(true, Ordering::SeqCst);

        let timer = self.reconnect_timer.lock().take();
        if let Some(timer) = timer {
            timer.abort();
        }

        let released = self.subscriptions.clear();
        self.dynamic.lock().clear();

        let listener = self.connection_listener.lock().take();
        if let Some(listener) = listener {
            listener.release();
        }

        self.adapter.disconnect();
        self.state.set_status(ConnectionStatus::Disconnected);
        info!(released, "disconnected");
    }

    fn next_id(&self) -> u64 {
        self.next_subscription_id.fetch_add(1, Ordering::SeqCst)
    }

    fn remember(&self, path: &str, binding: Arc<dyn Binding>, id: u64) {
        let mut dynamic = self.dynamic.lock();
        match dynamic.iter_mut().find(|d| d.path == path) {
            Some(entry) => {
                entry.binding = binding;
                entry.id = id;
            }
            None => dynamic.push(DynamicSubscription {
                path: path.to_string(),
                binding,
                id,
            }),
        }
    }

    fn unsubscribe(&self, path: &str) -> bool {
        self.dynamic.lock().retain(|d| d.path != path);
        let removed = self.subscriptions.remove(path);
        if removed {
            debug!(path, "unsubscribed");
        }
        removed
    }

    /// Unsubscribes `path` only while install `id` is still the current one.
    fn release_subscription(&self, path: &str, id: u64) -> bool {
        self.dynamic.lock().retain(|d| !(d.path == path && d.id == id));
        let removed = self.subscriptions.remove_if(path, id);
        if removed {
            debug!(path, id, "unsubscribed");
        }
        removed
    }

    /// Installs configured and dynamic subscriptions. Returns how many resolved.
    fn install_all(self: &Arc<Self>) -> usize {
        let configured = self
            .configured
            .iter()
            .filter(|(path, binding)| self.install(path, binding, self.next_id()))
            .count();
        let dynamic = self.dynamic.lock().clone();
        let reinstalled = dynamic
            .iter()
            .filter(|d| self.install(&d.path, &d.binding, d.id))
            .count();
        configured + reinstalled
    }

    /// Installs one subscription, releasing any previous one for `path`.
    fn install(self: &Arc<Self>, path: &str, binding: &Arc<dyn Binding>, id: u64) -> bool {
        self.subscriptions.remove(path);

        let spec = binding.topic_spec();
        let applier = match binding.bind(path, &self.targets) {
            Ok(applier) => applier,
            Err(e) => {
                warn!(path, topic = %spec.topic, error = %e, "subscription target missing, ignoring events");
                self.subscriptions.insert(path, ActiveSubscription::noop(id));
                return false;
            }
        };

        let active = Arc::new(AtomicBool::new(true));
        let on_event: EventCallback = {
            let active = Arc::clone(&active);
            let inner = Arc::downgrade(self);
            let path = path.to_string();
            Arc::new(move |event: NormalizedEvent| {
                if !active.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(inner) = inner.upgrade() {
                    inner.apply(&path, &*applier, event);
                }
            })
        };

        let handle = self.adapter.subscribe(spec, on_event);
        self.subscriptions
            .insert(path, ActiveSubscription::new(id, active, handle));
        debug!(path, topic = %spec.qualified_name(), "subscribed");
        true
    }

    fn apply(&self, path: &str, applier: &dyn Applier, event: NormalizedEvent) {
        let kind = event.kind;
        let timestamp = event.timestamp;
        match applier.apply(event) {
            Ok(applied) => {
                {
                    let mut stats = self.stats.write();
                    stats.events_applied += 1;
                    stats.last_event_at = Some(timestamp);
                }
                if self.options.debug_logging {
                    match applied {
                        Applied::Upserted(id) => debug!(path, %kind, %id, "applied event"),
                        Applied::Removed { id, existed } => {
                            debug!(path, %kind, %id, existed, "applied event")
                        }
                    }
                }
            }
            Err(e) => {
                self.stats.write().events_dropped += 1;
                warn!(path, %kind, error = %e, "dropping event");
            }
        }
    }
}
