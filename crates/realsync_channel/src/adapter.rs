//! Channel adapter.
//!
//! Multiplexes one channel per subscription over a single backend
//! connection. Each subscription joins its own channel named
//! `{prefix}:{namespace}.{topic}:{uuid}`; change frames are routed back by
//! channel name.

use crate::config::ChannelConfig;
use crate::error::{ChannelError, ChannelResult};
use crate::wire::{
    ChangeSubscription, Frame, JoinPayload, CONNECTION_TOPIC, EVENT_CHANGES, EVENT_CLOSE,
    EVENT_ERROR, EVENT_REPLY,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use realsync_core::{
    Adapter, CleanupHandle, ConnectionCallback, ConnectionChange, EventCallback, ListenerSlot,
    SyncResult, TopicSpec,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound half of a backend connection.
pub trait FrameSink: Send + Sync {
    /// Sends one text frame.
    fn send(&self, frame: String) -> ChannelResult<()>;

    /// Closes the connection. Idempotent.
    fn close(&self);
}

/// An open backend connection.
pub struct BackendConnection {
    /// Outbound frames.
    pub sink: Arc<dyn FrameSink>,
    /// Inbound frames; closed when the backend drops the connection.
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Something that can open connections to a channel backend.
#[async_trait]
pub trait ChannelBackend: Send + Sync + 'static {
    /// Opens a new connection.
    async fn open(&self) -> ChannelResult<BackendConnection>;
}

struct Session {
    sink: Arc<dyn FrameSink>,
    reader: JoinHandle<()>,
}

struct Channel {
    spec: TopicSpec,
    join: JoinPayload,
    on_event: EventCallback,
}

struct Shared {
    listener: ListenerSlot,
    connected: AtomicBool,
    /// Bumped on every connect and disconnect; readers of older sessions go quiet.
    generation: AtomicU64,
    session: Mutex<Option<Session>>,
    channels: Mutex<HashMap<String, Channel>>,
    next_ref: AtomicU64,
}

/// [`Adapter`] over a [`ChannelBackend`].
pub struct ChannelAdapter<B: ChannelBackend> {
    backend: B,
    config: ChannelConfig,
    shared: Arc<Shared>,
}

impl<B: ChannelBackend> ChannelAdapter<B> {
    /// Creates an adapter. Nothing is opened until [`Adapter::connect`].
    pub fn new(backend: B, config: ChannelConfig) -> Self {
        Self {
            backend,
            config,
            shared: Arc::new(Shared {
                listener: ListenerSlot::new(),
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                session: Mutex::new(None),
                channels: Mutex::new(HashMap::new()),
                next_ref: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Returns the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the names of the channels currently subscribed, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.channels.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn channel_name(&self, spec: &TopicSpec) -> String {
        let namespace = spec
            .namespace
            .as_deref()
            .unwrap_or(&self.config.default_namespace);
        format!(
            "{}:{}.{}:{}",
            self.config.topic_prefix,
            namespace,
            spec.topic,
            Uuid::new_v4()
        )
    }

    fn join_payload(&self, spec: &TopicSpec) -> JoinPayload {
        JoinPayload::single(ChangeSubscription {
            event: spec.event_filter.as_str().to_string(),
            schema: spec
                .namespace
                .clone()
                .unwrap_or_else(|| self.config.default_namespace.clone()),
            table: spec.topic.clone(),
            filter: spec.filter.clone(),
        })
    }
}

#[async_trait]
impl<B: ChannelBackend> Adapter for ChannelAdapter<B> {
    async fn connect(&self) -> SyncResult<()> {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.close_session();

        let opened = tokio::time::timeout(self.config.connect_timeout, self.backend.open())
            .await
            .unwrap_or_else(|_| Err(ChannelError::Timeout(self.config.connect_timeout)));
        let connection = match opened {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "channel connect failed");
                self.shared.connected.store(false, Ordering::SeqCst);
                self.shared
                    .listener
                    .notify(ConnectionChange::failed(e.to_string()));
                return Err(e.into());
            }
        };

        if self.shared.generation.load(Ordering::SeqCst) != generation {
            // Disconnected while opening.
            connection.sink.close();
            return Err(ChannelError::Closed.into());
        }

        let reader = tokio::spawn(read_frames(
            Arc::downgrade(&self.shared),
            generation,
            connection.inbound,
        ));
        *self.shared.session.lock() = Some(Session {
            sink: connection.sink,
            reader,
        });
        self.shared.connected.store(true, Ordering::SeqCst);

        let rejoined = self.shared.rejoin_all();
        info!(channels = rejoined, "channel connected");
        self.shared.listener.notify(ConnectionChange::connected());
        Ok(())
    }

    fn disconnect(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);
        if self.shared.close_session() {
            debug!("channel disconnected");
        }
    }

    fn subscribe(&self, spec: &TopicSpec, on_event: EventCallback) -> CleanupHandle {
        let name = self.channel_name(spec);
        let join = self.join_payload(spec);
        if self.is_connected() {
            self.shared.send_join(&name, &join);
        }
        self.shared.channels.lock().insert(
            name.clone(),
            Channel {
                spec: spec.clone(),
                join,
                on_event,
            },
        );
        debug!(channel = %name, "channel subscribed");

        let shared = Arc::downgrade(&self.shared);
        CleanupHandle::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.leave(&name);
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn on_connection_change(&self, callback: ConnectionCallback) -> CleanupHandle {
        self.shared.listener.register(callback)
    }
}

impl<B: ChannelBackend> Drop for ChannelAdapter<B> {
    fn drop(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.close_session();
    }
}

impl Shared {
    /// Closes and forgets the current session. Returns true if there was one.
    fn close_session(&self) -> bool {
        let session = self.session.lock().take();
        match session {
            Some(session) => {
                session.sink.close();
                session.reader.abort();
                true
            }
            None => false,
        }
    }

    fn send(&self, frame: &Frame) -> ChannelResult<()> {
        let sink = self
            .session
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.sink))
            .ok_or(ChannelError::Closed)?;
        sink.send(frame.encode()?)
    }

    fn send_join(&self, name: &str, join: &JoinPayload) {
        let reference = self.next_ref.fetch_add(1, Ordering::SeqCst).to_string();
        let result =
            Frame::join(name, join).and_then(|frame| self.send(&frame.with_reference(reference)));
        if let Err(e) = result {
            warn!(channel = %name, error = %e, "failed to join channel");
        }
    }

    fn rejoin_all(&self) -> usize {
        let joins: Vec<(String, JoinPayload)> = self
            .channels
            .lock()
            .iter()
            .map(|(name, channel)| (name.clone(), channel.join.clone()))
            .collect();
        for (name, join) in &joins {
            self.send_join(name, join);
        }
        joins.len()
    }

    fn leave(&self, name: &str) {
        if self.channels.lock().remove(name).is_none() {
            return;
        }
        if self.connected.load(Ordering::SeqCst) {
            if let Err(e) = self.send(&Frame::leave(name)) {
                debug!(channel = %name, error = %e, "leave not sent");
            }
        }
        debug!(channel = %name, "channel left");
    }

    fn handle_frame(&self, text: &str) {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };

        let event = frame.event.clone();
        match event.as_str() {
            EVENT_CHANGES => self.dispatch(frame),
            EVENT_REPLY => {
                if let Some(reason) = frame.reply_error_reason() {
                    let err = ChannelError::Rejected {
                        channel: frame.topic,
                        reason,
                    };
                    warn!(error = %err, "channel join rejected");
                }
            }
            EVENT_CLOSE if frame.topic == CONNECTION_TOPIC => {
                self.connection_lost(None);
            }
            EVENT_ERROR if frame.topic == CONNECTION_TOPIC => {
                let reason = frame.payload["reason"]
                    .as_str()
                    .unwrap_or("connection error")
                    .to_string();
                self.connection_lost(Some(reason));
            }
            other => debug!(event = other, topic = %frame.topic, "ignoring frame"),
        }
    }

    fn dispatch(&self, frame: Frame) {
        let target = self
            .channels
            .lock()
            .get(&frame.topic)
            .map(|c| (c.spec.clone(), Arc::clone(&c.on_event)));
        let Some((spec, on_event)) = target else {
            debug!(channel = %frame.topic, "change for unknown channel");
            return;
        };

        let event = match frame.change().and_then(|change| change.into_event()) {
            Ok(event) => event,
            Err(e) => {
                warn!(channel = %frame.topic, error = %e, "dropping malformed change");
                return;
            }
        };
        if spec.event_filter.matches(event.kind) {
            on_event(event);
        }
    }

    /// Marks the connection lost and tells the listener, once per session.
    fn connection_lost(&self, error: Option<String>) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(session) = self.session.lock().take() {
            session.sink.close();
        }
        let change = match error {
            Some(error) => {
                warn!(error = %error, "channel connection lost");
                ConnectionChange::failed(error)
            }
            None => {
                info!("channel connection closed by backend");
                ConnectionChange::disconnected()
            }
        };
        self.listener.notify(change);
    }
}

async fn read_frames(
    shared: Weak<Shared>,
    generation: u64,
    mut inbound: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = inbound.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        shared.handle_frame(&text);
    }

    if let Some(shared) = shared.upgrade() {
        if shared.generation.load(Ordering::SeqCst) == generation {
            shared.connection_lost(Some(ChannelError::Closed.to_string()));
        }
    }
}
