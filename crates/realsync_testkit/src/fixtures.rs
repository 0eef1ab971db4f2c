//! Fixture entities and target registries.

use realsync_core::{EntityCollection, NormalizedEvent, TargetRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Path and topic used by the fixtures.
pub const ITEMS: &str = "items";

/// A minimal keyed entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Primary key.
    pub id: i64,
    /// Display name.
    pub name: String,
}

impl Item {
    /// Creates an item.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Returns the row a backend would send for an item.
pub fn item_row(id: i64, name: &str) -> Value {
    json!({ "id": id, "name": name })
}

/// Returns an insert event for [`ITEMS`].
pub fn item_inserted(id: i64, name: &str) -> NormalizedEvent {
    NormalizedEvent::insert(ITEMS, item_row(id, name))
}

/// Returns an update event for [`ITEMS`].
pub fn item_updated(id: i64, name: &str) -> NormalizedEvent {
    NormalizedEvent::update(ITEMS, item_row(id, name), None)
}

/// Returns a delete event for [`ITEMS`] carrying only the key.
pub fn item_deleted(id: i64) -> NormalizedEvent {
    NormalizedEvent::delete(ITEMS, json!({ "id": id }))
}

/// Creates a registry with an empty [`Item`] collection under [`ITEMS`].
pub fn items_registry() -> (Arc<TargetRegistry>, Arc<EntityCollection<Item>>) {
    let registry = TargetRegistry::new();
    let items = registry.insert_collection(ITEMS, EntityCollection::<Item>::new());
    (Arc::new(registry), items)
}
