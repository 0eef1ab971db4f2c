//! Applying normalized events to sync targets.

use realsync_core::{
    EntityId, EventKind, NormalizedEvent, SubscriptionDescriptor, SyncError, SyncResult,
    SyncTarget, TargetRegistry, TopicSpec,
};
use std::sync::Arc;

/// Outcome of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The entity was inserted or replaced.
    Upserted(EntityId),
    /// A delete was applied.
    Removed {
        /// Id computed from the old row.
        id: EntityId,
        /// Whether the entity was present.
        existed: bool,
    },
}

/// Applies `event` to `target` as described by `descriptor`.
///
/// Inserts and updates transform the new row and key it with `select_id`;
/// the stored entity is replaced wholesale. Deletes key the old row with
/// `raw_id` without transforming it. Events missing the row their kind needs,
/// rows without an id, and rows the transform rejects yield
/// [`SyncError::MalformedEvent`] and leave the target untouched.
pub fn apply_event<E>(
    descriptor: &SubscriptionDescriptor<E>,
    target: &dyn SyncTarget<E>,
    event: NormalizedEvent,
) -> SyncResult<Applied> {
    match event.kind {
        EventKind::Insert | EventKind::Update => {
            let raw = event.new_value.as_ref().ok_or_else(|| {
                SyncError::malformed(&event.topic, format!("{} event without new record", event.kind))
            })?;
            let entity = descriptor
                .transform(raw)
                .map_err(|e| SyncError::malformed(&event.topic, format!("transform failed: {e}")))?;
            let select_id = descriptor.select_id_fn();
            target
                .upsert_one(entity, &**select_id)
                .map(Applied::Upserted)
                .ok_or_else(|| SyncError::malformed(&event.topic, "record has no id"))
        }
        EventKind::Delete => {
            let raw = event
                .old_value
                .as_ref()
                .ok_or_else(|| SyncError::malformed(&event.topic, "delete event without old record"))?;
            let id = descriptor
                .raw_id(raw)
                .ok_or_else(|| SyncError::malformed(&event.topic, "old record has no id"))?;
            let existed = target.remove_one(&id).is_some();
            Ok(Applied::Removed { id, existed })
        }
    }
}

/// A subscription with its entity type erased.
pub(crate) trait Binding: Send + Sync {
    /// Transport-visible part of the subscription.
    fn topic_spec(&self) -> &TopicSpec;

    /// Resolves the target at `path` and returns the event applier for it.
    fn bind(&self, path: &str, targets: &TargetRegistry) -> SyncResult<Arc<dyn Applier>>;
}

/// Applies events to one resolved target.
pub(crate) trait Applier: Send + Sync {
    fn apply(&self, event: NormalizedEvent) -> SyncResult<Applied>;
}

struct Bound<E> {
    descriptor: SubscriptionDescriptor<E>,
    target: Arc<dyn SyncTarget<E>>,
}

impl<E: Send + Sync> Applier for Bound<E> {
    fn apply(&self, event: NormalizedEvent) -> SyncResult<Applied> {
        apply_event(&self.descriptor, &*self.target, event)
    }
}

impl<E: Send + Sync + 'static> Binding for SubscriptionDescriptor<E> {
    fn topic_spec(&self) -> &TopicSpec {
        self.spec()
    }

    fn bind(&self, path: &str, targets: &TargetRegistry) -> SyncResult<Arc<dyn Applier>> {
        let target = targets
            .resolve::<E>(path)
            .ok_or_else(|| SyncError::SubscriptionTargetMissing {
                path: path.to_string(),
            })?;
        Ok(Arc::new(Bound {
            descriptor: self.clone(),
            target,
        }))
    }
}
