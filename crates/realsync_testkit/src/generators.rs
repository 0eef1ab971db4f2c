//! Property-based test generators using proptest.
//!
//! Provides strategies for change events on the [`Item`] fixture and a
//! reference model to check applied state against.

use crate::fixtures::{item_deleted, item_inserted, item_updated, Item};
use proptest::prelude::*;
use realsync_core::{EventKind, NormalizedEvent};
use std::collections::BTreeMap;

/// Strategy for generating event kinds.
pub fn event_kind_strategy() -> impl Strategy<Value = EventKind> {
    prop_oneof![
        Just(EventKind::Insert),
        Just(EventKind::Update),
        Just(EventKind::Delete),
    ]
}

/// Strategy for generating item names.
pub fn item_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9 ]{0,15}").expect("Invalid regex")
}

/// Strategy for generating items with ids in `1..=max_id`.
pub fn item_strategy(max_id: i64) -> impl Strategy<Value = Item> {
    (1..=max_id, item_name_strategy()).prop_map(|(id, name)| Item::new(id, name))
}

/// Strategy for generating item events with ids in `1..=max_id`.
///
/// A small id range makes updates and deletes hit existing items often.
pub fn item_event_strategy(max_id: i64) -> impl Strategy<Value = NormalizedEvent> {
    (event_kind_strategy(), item_strategy(max_id)).prop_map(|(kind, item)| match kind {
        EventKind::Insert => item_inserted(item.id, &item.name),
        EventKind::Update => item_updated(item.id, &item.name),
        EventKind::Delete => item_deleted(item.id),
    })
}

/// Strategy for generating sequences of item events.
pub fn item_event_sequence_strategy(
    max_id: i64,
    max_len: usize,
) -> impl Strategy<Value = Vec<NormalizedEvent>> {
    prop::collection::vec(item_event_strategy(max_id), 0..max_len)
}

/// Replays item events into a map, the expected state after applying them.
///
/// Inserts and updates replace, deletes remove; the last event per id wins.
/// Events that do not carry a decodable item are skipped.
pub fn replay_items(events: &[NormalizedEvent]) -> BTreeMap<i64, Item> {
    let mut model = BTreeMap::new();
    for event in events {
        match event.kind {
            EventKind::Insert | EventKind::Update => {
                let item = event
                    .new_value
                    .clone()
                    .and_then(|row| serde_json::from_value::<Item>(row).ok());
                if let Some(item) = item {
                    model.insert(item.id, item);
                }
            }
            EventKind::Delete => {
                if let Some(id) = event
                    .old_value
                    .as_ref()
                    .and_then(|row| row.get("id"))
                    .and_then(|id| id.as_i64())
                {
                    model.remove(&id);
                }
            }
        }
    }
    model
}
