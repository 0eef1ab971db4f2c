//! Subscription descriptors.

use crate::entity::{EntityId, DEFAULT_ID_FIELD};
use crate::error::SyncResult;
use crate::event::{EventFilter, TopicSpec};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Extracts the id of a transformed entity.
pub type SelectIdFn<E> = Arc<dyn Fn(&E) -> Option<EntityId> + Send + Sync>;

/// Turns a raw backend row into an entity.
pub type TransformFn<E> = Arc<dyn Fn(&Value) -> SyncResult<E> + Send + Sync>;

/// Extracts an id from a raw, untransformed row.
pub type RawIdFn = Arc<dyn Fn(&Value) -> Option<EntityId> + Send + Sync>;

/// Describes how one backend topic maps onto a local collection of `E`.
///
/// Inserts and updates go through `transform` and are keyed with `select_id`
/// on the transformed entity. Deletes are keyed with `raw_id` on the old row
/// as received, because delete payloads usually carry only the key columns
/// and would not survive `transform`.
pub struct SubscriptionDescriptor<E> {
    spec: TopicSpec,
    select_id: SelectIdFn<E>,
    transform: TransformFn<E>,
    raw_id: RawIdFn,
}

impl<E> SubscriptionDescriptor<E>
where
    E: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a descriptor for every event on `topic`.
    ///
    /// Rows are deserialized into `E` (the identity for `serde_json::Value`)
    /// and keyed by their `id` field.
    pub fn new(topic: impl Into<String>) -> Self {
        Self::with_functions(
            topic,
            Arc::new(|raw: &Value| -> SyncResult<E> { Ok(serde_json::from_value(raw.clone())?) }),
            Arc::new(|entity: &E| {
                serde_json::to_value(entity)
                    .ok()
                    .and_then(|value| EntityId::from_field(&value, DEFAULT_ID_FIELD))
            }),
        )
    }

    /// Keys both entities and raw rows by `field` instead of `id`.
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        let field: String = field.into();
        let field: Arc<str> = Arc::from(field);
        let raw_field = Arc::clone(&field);
        self.select_id = Arc::new(move |entity: &E| {
            serde_json::to_value(entity)
                .ok()
                .and_then(|value| EntityId::from_field(&value, &field))
        });
        self.raw_id = Arc::new(move |raw: &Value| EntityId::from_field(raw, &raw_field));
        self
    }
}

impl<E> SubscriptionDescriptor<E> {
    /// Creates a descriptor with explicit transform and id functions.
    pub fn with_functions(
        topic: impl Into<String>,
        transform: TransformFn<E>,
        select_id: SelectIdFn<E>,
    ) -> Self {
        Self {
            spec: TopicSpec::new(topic),
            select_id,
            transform,
            raw_id: Arc::new(|raw: &Value| EntityId::from_field(raw, DEFAULT_ID_FIELD)),
        }
    }

    /// Restricts delivery to one event kind.
    pub fn with_event_filter(mut self, event_filter: EventFilter) -> Self {
        self.spec.event_filter = event_filter;
        self
    }

    /// Sets the backend row filter expression.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.spec.filter = Some(filter.into());
        self
    }

    /// Sets the backend namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.spec.namespace = Some(namespace.into());
        self
    }

    /// Replaces the entity id selector.
    pub fn with_select_id(
        mut self,
        select_id: impl Fn(&E) -> Option<EntityId> + Send + Sync + 'static,
    ) -> Self {
        self.select_id = Arc::new(select_id);
        self
    }

    /// Replaces the row transform.
    pub fn with_transform(
        mut self,
        transform: impl Fn(&Value) -> SyncResult<E> + Send + Sync + 'static,
    ) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    /// Replaces the raw-row id selector used for deletes.
    pub fn with_raw_id(
        mut self,
        raw_id: impl Fn(&Value) -> Option<EntityId> + Send + Sync + 'static,
    ) -> Self {
        self.raw_id = Arc::new(raw_id);
        self
    }

    /// Returns the transport-visible part of the descriptor.
    pub fn spec(&self) -> &TopicSpec {
        &self.spec
    }

    /// Returns the topic name.
    pub fn topic(&self) -> &str {
        &self.spec.topic
    }

    /// Applies the transform to a raw row.
    pub fn transform(&self, raw: &Value) -> SyncResult<E> {
        (self.transform)(raw)
    }

    /// Returns the id of a transformed entity.
    pub fn select_id(&self, entity: &E) -> Option<EntityId> {
        (self.select_id)(entity)
    }

    /// Returns the id of a raw row.
    pub fn raw_id(&self, raw: &Value) -> Option<EntityId> {
        (self.raw_id)(raw)
    }

    /// Returns the entity id selector.
    pub fn select_id_fn(&self) -> &SelectIdFn<E> {
        &self.select_id
    }
}

impl<E> Clone for SubscriptionDescriptor<E> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            select_id: Arc::clone(&self.select_id),
            transform: Arc::clone(&self.transform),
            raw_id: Arc::clone(&self.raw_id),
        }
    }
}

impl<E> fmt::Debug for SubscriptionDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionDescriptor")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}
