//! Wire frames exchanged with a channel backend.
//!
//! Every frame is a JSON object `{topic, event, payload, ref}` sent as one
//! text message. Change notifications carry a [`ChangePayload`] describing one
//! row change.

use crate::error::{ChannelError, ChannelResult};
use chrono::{DateTime, Utc};
use realsync_core::{EventKind, NormalizedEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Client request to join a channel.
pub const EVENT_JOIN: &str = "phx_join";
/// Client request to leave a channel.
pub const EVENT_LEAVE: &str = "phx_leave";
/// Server reply to a join or leave.
pub const EVENT_REPLY: &str = "phx_reply";
/// Server notification of a row change.
pub const EVENT_CHANGES: &str = "postgres_changes";
/// Server notice that the connection is closing normally.
pub const EVENT_CLOSE: &str = "phx_close";
/// Server notice that the connection failed.
pub const EVENT_ERROR: &str = "phx_error";
/// Topic of connection-level frames.
pub const CONNECTION_TOPIC: &str = "phoenix";

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Channel the frame belongs to.
    pub topic: String,
    /// Frame kind.
    pub event: String,
    /// Event-specific body.
    #[serde(default)]
    pub payload: Value,
    /// Request reference echoed in replies.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl Frame {
    /// Creates a frame.
    pub fn new(topic: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            event: event.into(),
            payload,
            reference: None,
        }
    }

    /// Sets the request reference.
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Creates a join request.
    pub fn join(channel: impl Into<String>, payload: &JoinPayload) -> ChannelResult<Self> {
        Ok(Self::new(channel, EVENT_JOIN, serde_json::to_value(payload)?))
    }

    /// Creates a leave request.
    pub fn leave(channel: impl Into<String>) -> Self {
        Self::new(channel, EVENT_LEAVE, json!({}))
    }

    /// Creates a successful reply.
    pub fn reply_ok(channel: impl Into<String>, reference: Option<String>) -> Self {
        let mut frame = Self::new(channel, EVENT_REPLY, json!({ "status": "ok", "response": {} }));
        frame.reference = reference;
        frame
    }

    /// Creates an error reply.
    pub fn reply_error(channel: impl Into<String>, reference: Option<String>, reason: &str) -> Self {
        let mut frame = Self::new(
            channel,
            EVENT_REPLY,
            json!({ "status": "error", "response": { "reason": reason } }),
        );
        frame.reference = reference;
        frame
    }

    /// Creates a change notification.
    pub fn changes(channel: impl Into<String>, change: &ChangePayload) -> ChannelResult<Self> {
        Ok(Self::new(
            channel,
            EVENT_CHANGES,
            json!({ "data": serde_json::to_value(change)? }),
        ))
    }

    /// Decodes a frame from text.
    pub fn decode(text: &str) -> ChannelResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encodes the frame as text.
    pub fn encode(&self) -> ChannelResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the error reason of a failed reply.
    pub fn reply_error_reason(&self) -> Option<String> {
        if self.event != EVENT_REPLY || self.payload["status"] != "error" {
            return None;
        }
        Some(
            self.payload["response"]["reason"]
                .as_str()
                .unwrap_or("rejected")
                .to_string(),
        )
    }

    /// Extracts the change carried by a change notification.
    pub fn change(&self) -> ChannelResult<ChangePayload> {
        if self.event != EVENT_CHANGES {
            return Err(ChannelError::protocol(format!(
                "expected {EVENT_CHANGES}, got {}",
                self.event
            )));
        }
        let data = self
            .payload
            .get("data")
            .cloned()
            .ok_or_else(|| ChannelError::protocol("change frame without data"))?;
        Ok(serde_json::from_value(data)?)
    }
}

/// One change subscription inside a join request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSubscription {
    /// `INSERT`, `UPDATE`, `DELETE` or `*`.
    pub event: String,
    /// Namespace of the table.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Optional filter expression, e.g. `status=eq.active`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Body of a join request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoinPayload {
    /// Channel configuration.
    pub config: JoinConfig,
}

/// Channel configuration of a join request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Requested change subscriptions.
    #[serde(default)]
    pub postgres_changes: Vec<ChangeSubscription>,
}

impl JoinPayload {
    /// Creates a join body with one change subscription.
    pub fn single(subscription: ChangeSubscription) -> Self {
        Self {
            config: JoinConfig {
                postgres_changes: vec![subscription],
            },
        }
    }
}

/// One row change as sent by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    /// Namespace of the table.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Commit time, RFC 3339.
    #[serde(default)]
    pub commit_timestamp: Option<String>,
    /// `INSERT`, `UPDATE` or `DELETE`.
    #[serde(rename = "eventType")]
    pub event_type: String,
    /// Row after the change; `{}` when absent.
    #[serde(default)]
    pub new: Value,
    /// Row before the change; `{}` when absent.
    #[serde(default)]
    pub old: Value,
}

impl ChangePayload {
    /// Creates a change stamped with the current time.
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        kind: EventKind,
        new: Option<Value>,
        old: Option<Value>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            commit_timestamp: Some(Utc::now().to_rfc3339()),
            event_type: kind.as_str().to_string(),
            new: new.unwrap_or_else(empty_row),
            old: old.unwrap_or_else(empty_row),
        }
    }

    /// Returns the row a filter expression is evaluated against.
    pub fn filter_row(&self) -> &Value {
        if self.event_type.eq_ignore_ascii_case("DELETE") {
            &self.old
        } else {
            &self.new
        }
    }

    /// Converts the change into a [`NormalizedEvent`].
    ///
    /// Empty rows become `None`. A missing or unparsable commit timestamp is
    /// replaced by the current time.
    pub fn into_event(self) -> ChannelResult<NormalizedEvent> {
        let kind = EventKind::parse(&self.event_type).ok_or_else(|| {
            ChannelError::protocol(format!("unknown change type {:?}", self.event_type))
        })?;
        let timestamp = self
            .commit_timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(NormalizedEvent::new(kind, self.table, present(self.new), present(self.old))
            .with_namespace(self.schema)
            .with_timestamp(timestamp))
    }
}

fn empty_row() -> Value {
    Value::Object(Map::new())
}

fn present(row: Value) -> Option<Value> {
    match row {
        Value::Null => None,
        Value::Object(ref map) if map.is_empty() => None,
        row => Some(row),
    }
}
