//! In-process channel backend.
//!
//! [`LoopbackHub`] speaks the channel protocol without a network: sessions
//! join channels, and changes published to the hub fan out to every channel
//! whose subscription matches. Tests use it to exercise the whole stack.

use crate::adapter::{BackendConnection, ChannelBackend, FrameSink};
use crate::error::{ChannelError, ChannelResult};
use crate::filter::FilterExpr;
use crate::wire::{
    ChangePayload, ChangeSubscription, Frame, JoinPayload, CONNECTION_TOPIC, EVENT_CLOSE,
    EVENT_ERROR, EVENT_JOIN, EVENT_LEAVE,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use realsync_core::{EventFilter, EventKind};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Namespace used by the publishing shortcuts.
pub const DEFAULT_SCHEMA: &str = "public";

struct Joined {
    subscription: ChangeSubscription,
    event: EventFilter,
    filter: Option<FilterExpr>,
}

impl Joined {
    fn accepts(&self, change: &ChangePayload, kind: EventKind) -> bool {
        self.subscription.schema == change.schema
            && self.subscription.table == change.table
            && self.event.matches(kind)
            && self
                .filter
                .as_ref()
                .map_or(true, |f| f.matches(change.filter_row()))
    }
}

struct HubSession {
    outbound: mpsc::UnboundedSender<String>,
    channels: HashMap<String, Joined>,
}

struct HubInner {
    reachable: AtomicBool,
    next_session: AtomicU64,
    sessions: RwLock<HashMap<u64, HubSession>>,
}

/// In-process [`ChannelBackend`].
///
/// Clones share the same hub.
#[derive(Clone)]
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    /// Creates a reachable hub without sessions.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                reachable: AtomicBool::new(true),
                next_session: AtomicU64::new(1),
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Makes new connections succeed or fail. Open sessions are unaffected.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Returns the number of open sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.read().len()
    }

    /// Returns the number of joined channels across sessions.
    pub fn channel_count(&self) -> usize {
        self.inner
            .sessions
            .read()
            .values()
            .map(|s| s.channels.len())
            .sum()
    }

    /// Publishes a change. Returns the number of channels notified.
    pub fn publish(&self, change: &ChangePayload) -> ChannelResult<usize> {
        let kind = EventKind::parse(&change.event_type).ok_or_else(|| {
            ChannelError::protocol(format!("unknown change type {:?}", change.event_type))
        })?;

        let mut delivered = 0;
        for session in self.inner.sessions.read().values() {
            for (name, joined) in &session.channels {
                if !joined.accepts(change, kind) {
                    continue;
                }
                let text = Frame::changes(name, change)?.encode()?;
                if session.outbound.send(text).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!(table = %change.table, kind = %kind, delivered, "published change");
        Ok(delivered)
    }

    /// Publishes an insert into `table` in the default schema.
    pub fn insert(&self, table: &str, row: Value) -> ChannelResult<usize> {
        self.publish(&ChangePayload::new(DEFAULT_SCHEMA, table, EventKind::Insert, Some(row), None))
    }

    /// Publishes an update of `table` in the default schema.
    pub fn update(&self, table: &str, row: Value, old: Option<Value>) -> ChannelResult<usize> {
        self.publish(&ChangePayload::new(DEFAULT_SCHEMA, table, EventKind::Update, Some(row), old))
    }

    /// Publishes a delete from `table` in the default schema.
    pub fn delete(&self, table: &str, old: Value) -> ChannelResult<usize> {
        self.publish(&ChangePayload::new(DEFAULT_SCHEMA, table, EventKind::Delete, None, Some(old)))
    }

    /// Closes every session.
    ///
    /// With a reason, clients see a connection error; without, a clean close.
    pub fn drop_sessions(&self, reason: Option<&str>) -> usize {
        let sessions: Vec<HubSession> = self.inner.sessions.write().drain().map(|(_, s)| s).collect();
        let frame = match reason {
            Some(reason) => Frame::new(CONNECTION_TOPIC, EVENT_ERROR, json!({ "reason": reason })),
            None => Frame::new(CONNECTION_TOPIC, EVENT_CLOSE, json!({})),
        };
        if let Ok(text) = frame.encode() {
            for session in &sessions {
                let _ = session.outbound.send(text.clone());
            }
        }
        sessions.len()
    }
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelBackend for LoopbackHub {
    async fn open(&self) -> ChannelResult<BackendConnection> {
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(ChannelError::Unreachable("loopback hub is down".into()));
        }

        let (outbound, inbound) = mpsc::unbounded_channel();
        let id = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        self.inner.sessions.write().insert(
            id,
            HubSession {
                outbound,
                channels: HashMap::new(),
            },
        );
        debug!(session = id, "loopback session opened");

        Ok(BackendConnection {
            sink: Arc::new(SessionSink {
                hub: Arc::downgrade(&self.inner),
                session: id,
            }),
            inbound,
        })
    }
}

/// Server side of one loopback session. Requests are handled synchronously.
struct SessionSink {
    hub: Weak<HubInner>,
    session: u64,
}

impl SessionSink {
    fn handle(&self, hub: &HubInner, frame: Frame) -> ChannelResult<()> {
        let mut sessions = hub.sessions.write();
        let session = sessions.get_mut(&self.session).ok_or(ChannelError::Closed)?;

        let reply = match frame.event.as_str() {
            EVENT_JOIN => match join(&frame.payload) {
                Ok(joined) => {
                    session.channels.insert(frame.topic.clone(), joined);
                    Frame::reply_ok(&frame.topic, frame.reference)
                }
                Err(e) => {
                    warn!(channel = %frame.topic, error = %e, "loopback join rejected");
                    Frame::reply_error(&frame.topic, frame.reference, &e.to_string())
                }
            },
            EVENT_LEAVE => {
                session.channels.remove(&frame.topic);
                Frame::reply_ok(&frame.topic, frame.reference)
            }
            other => Frame::reply_error(
                &frame.topic,
                frame.reference,
                &format!("unsupported event {other}"),
            ),
        };

        session
            .outbound
            .send(reply.encode()?)
            .map_err(|_| ChannelError::Closed)
    }
}

fn join(payload: &Value) -> ChannelResult<Joined> {
    let payload: JoinPayload = serde_json::from_value(payload.clone())?;
    let subscription = payload
        .config
        .postgres_changes
        .into_iter()
        .next()
        .ok_or_else(|| ChannelError::protocol("join without change subscription"))?;
    let event = EventFilter::parse(&subscription.event)
        .ok_or_else(|| ChannelError::protocol(format!("unknown event {:?}", subscription.event)))?;
    let filter = subscription
        .filter
        .as_deref()
        .map(FilterExpr::parse)
        .transpose()?;
    Ok(Joined {
        subscription,
        event,
        filter,
    })
}

impl FrameSink for SessionSink {
    fn send(&self, frame: String) -> ChannelResult<()> {
        let hub = self.hub.upgrade().ok_or(ChannelError::Closed)?;
        self.handle(&hub, Frame::decode(&frame)?)
    }

    fn close(&self) {
        if let Some(hub) = self.hub.upgrade() {
            if hub.sessions.write().remove(&self.session).is_some() {
                debug!(session = self.session, "loopback session closed");
            }
        }
    }
}
