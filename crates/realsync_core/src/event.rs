//! Canonical change events.
//!
//! Adapters translate whatever their backend emits into [`NormalizedEvent`]s
//! before handing them to the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of change carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

impl EventKind {
    /// Parses a kind name, ignoring ASCII case (`"INSERT"`, `"insert"`).
    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("insert") {
            Some(EventKind::Insert)
        } else if name.eq_ignore_ascii_case("update") {
            Some(EventKind::Update)
        } else if name.eq_ignore_ascii_case("delete") {
            Some(EventKind::Delete)
        } else {
            None
        }
    }

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Insert => "insert",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which event kinds a subscription wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventFilter {
    /// Inserts only.
    Insert,
    /// Updates only.
    Update,
    /// Deletes only.
    Delete,
    /// Every kind (`*`).
    #[default]
    All,
}

impl EventFilter {
    /// Returns true if events of `kind` pass this filter.
    pub fn matches(&self, kind: EventKind) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Insert => kind == EventKind::Insert,
            EventFilter::Update => kind == EventKind::Update,
            EventFilter::Delete => kind == EventKind::Delete,
        }
    }

    /// Parses `"insert"`, `"update"`, `"delete"` or `"*"`.
    pub fn parse(name: &str) -> Option<Self> {
        if name == "*" {
            return Some(EventFilter::All);
        }
        EventKind::parse(name).map(EventFilter::from)
    }

    /// Returns the filter as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFilter::Insert => "INSERT",
            EventFilter::Update => "UPDATE",
            EventFilter::Delete => "DELETE",
            EventFilter::All => "*",
        }
    }
}

impl From<EventKind> for EventFilter {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Insert => EventFilter::Insert,
            EventKind::Update => EventFilter::Update,
            EventKind::Delete => EventFilter::Delete,
        }
    }
}

/// The part of a subscription an adapter needs to open a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicSpec {
    /// Backend topic (table, channel, collection name).
    pub topic: String,
    /// Event kinds to deliver.
    pub event_filter: EventFilter,
    /// Backend-side row filter, e.g. `"owner_id=eq.7"`.
    pub filter: Option<String>,
    /// Backend namespace (schema), if the backend has one.
    pub namespace: Option<String>,
}

impl TopicSpec {
    /// Creates a spec for every event on `topic`.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            event_filter: EventFilter::All,
            filter: None,
            namespace: None,
        }
    }

    /// Sets the event filter.
    pub fn with_event_filter(mut self, event_filter: EventFilter) -> Self {
        self.event_filter = event_filter;
        self
    }

    /// Sets the backend row filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Sets the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Returns `namespace.topic`, or just the topic without a namespace.
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}.{}", self.topic),
            None => self.topic.clone(),
        }
    }

    /// Returns true if an event from `namespace`/`topic` belongs to this spec.
    ///
    /// A spec without a namespace accepts any namespace.
    pub fn covers(&self, namespace: Option<&str>, topic: &str) -> bool {
        if self.topic != topic {
            return false;
        }
        match (&self.namespace, namespace) {
            (Some(wanted), Some(actual)) => wanted == actual,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// A backend change in canonical form.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    /// Kind of change.
    pub kind: EventKind,
    /// Row after the change (insert, update).
    pub new_value: Option<Value>,
    /// Row before the change (update, delete). Often only the key columns.
    pub old_value: Option<Value>,
    /// Topic the change happened on.
    pub topic: String,
    /// Namespace of the topic.
    pub namespace: Option<String>,
    /// Commit time reported by the backend.
    pub timestamp: DateTime<Utc>,
}

impl NormalizedEvent {
    /// Creates an event stamped with the current time.
    pub fn new(
        kind: EventKind,
        topic: impl Into<String>,
        new_value: Option<Value>,
        old_value: Option<Value>,
    ) -> Self {
        Self {
            kind,
            new_value,
            old_value,
            topic: topic.into(),
            namespace: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates an insert event.
    pub fn insert(topic: impl Into<String>, new_value: Value) -> Self {
        Self::new(EventKind::Insert, topic, Some(new_value), None)
    }

    /// Creates an update event.
    pub fn update(topic: impl Into<String>, new_value: Value, old_value: Option<Value>) -> Self {
        Self::new(EventKind::Update, topic, Some(new_value), old_value)
    }

    /// Creates a delete event.
    pub fn delete(topic: impl Into<String>, old_value: Value) -> Self {
        Self::new(EventKind::Delete, topic, None, Some(old_value))
    }

    /// Sets the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the commit timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns the payload this kind of event must carry.
    ///
    /// Inserts and updates need the new row, deletes need the old row.
    pub fn required_payload(&self) -> Option<&Value> {
        match self.kind {
            EventKind::Insert | EventKind::Update => self.new_value.as_ref(),
            EventKind::Delete => self.old_value.as_ref(),
        }
    }
}
