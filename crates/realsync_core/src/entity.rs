//! Entity identifier.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Field read by the default id selectors.
pub const DEFAULT_ID_FIELD: &str = "id";

/// Identifier of an entity inside a collection.
///
/// Backends key rows by integers or strings (UUIDs, slugs), so both are
/// supported. An integer and a string with the same digits are different ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    /// Integer key.
    Int(i64),
    /// String key.
    Text(String),
}

impl EntityId {
    /// Converts a JSON scalar into an id.
    ///
    /// Returns `None` for anything other than an integer or a string.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(EntityId::Int),
            Value::String(s) => Some(EntityId::Text(s.clone())),
            _ => None,
        }
    }

    /// Reads `field` from a JSON object and converts it into an id.
    pub fn from_field(record: &Value, field: &str) -> Option<Self> {
        record.get(field).and_then(Self::from_value)
    }

    /// Returns the id as a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            EntityId::Int(n) => Value::from(*n),
            EntityId::Text(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(n) => write!(f, "{n}"),
            EntityId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        EntityId::Int(value)
    }
}

impl From<i32> for EntityId {
    fn from(value: i32) -> Self {
        EntityId::Int(i64::from(value))
    }
}

impl From<u32> for EntityId {
    fn from(value: u32) -> Self {
        EntityId::Int(i64::from(value))
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId::Text(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        EntityId::Text(value)
    }
}
