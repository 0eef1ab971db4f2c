//! Local entity collections and the registry that addresses them.

use crate::entity::EntityId;
use parking_lot::RwLock;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A keyed container the orchestrator can write events into.
pub trait SyncTarget<E>: Send + Sync {
    /// Inserts `entity` or replaces the entity with the same id.
    ///
    /// Returns the id used, or `None` if `select_id` found no id and nothing
    /// was stored.
    fn upsert_one(&self, entity: E, select_id: &dyn Fn(&E) -> Option<EntityId>)
        -> Option<EntityId>;

    /// Removes the entity with `id`, returning it if it was present.
    fn remove_one(&self, id: &EntityId) -> Option<E>;
}

struct Entries<E> {
    order: Vec<EntityId>,
    by_id: HashMap<EntityId, E>,
}

/// An in-memory entity collection.
///
/// Entities keep their first insertion order; replacing an entity keeps its
/// position.
pub struct EntityCollection<E> {
    entries: RwLock<Entries<E>>,
}

impl<E: Clone> EntityCollection<E> {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Entries {
                order: Vec::new(),
                by_id: HashMap::new(),
            }),
        }
    }

    /// Gets a copy of the entity with `id`.
    pub fn by_id(&self, id: &EntityId) -> Option<E> {
        self.entries.read().by_id.get(id).cloned()
    }

    /// Returns copies of every entity in insertion order.
    pub fn all(&self) -> Vec<E> {
        let entries = self.entries.read();
        entries
            .order
            .iter()
            .filter_map(|id| entries.by_id.get(id).cloned())
            .collect()
    }

    /// Returns every id in insertion order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.entries.read().order.clone()
    }

    /// Returns true if an entity with `id` is stored.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.entries.read().by_id.contains_key(id)
    }

    /// Returns the number of entities.
    pub fn len(&self) -> usize {
        self.entries.read().by_id.len()
    }

    /// Returns true if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entity.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.order.clear();
        entries.by_id.clear();
    }
}

impl<E: Clone> Default for EntityCollection<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + Sync> SyncTarget<E> for EntityCollection<E> {
    fn upsert_one(
        &self,
        entity: E,
        select_id: &dyn Fn(&E) -> Option<EntityId>,
    ) -> Option<EntityId> {
        let id = select_id(&entity)?;
        let mut entries = self.entries.write();
        if entries.by_id.insert(id.clone(), entity).is_none() {
            entries.order.push(id.clone());
        }
        Some(id)
    }

    fn remove_one(&self, id: &EntityId) -> Option<E> {
        let mut entries = self.entries.write();
        let removed = entries.by_id.remove(id)?;
        entries.order.retain(|existing| existing != id);
        Some(removed)
    }
}

impl<E> fmt::Debug for EntityCollection<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCollection")
            .field("len", &self.entries.read().by_id.len())
            .finish()
    }
}

struct Slot {
    entity_type: &'static str,
    // Always an `Arc<dyn SyncTarget<E>>` for the `E` named by `entity_type`.
    target: Box<dyn Any + Send + Sync>,
}

/// Typed registry of sync targets keyed by local path.
///
/// The orchestrator resolves each configured path here at subscribe time.
/// Resolution fails if nothing is registered at the path or the registered
/// target stores a different entity type.
#[derive(Default)]
pub struct TargetRegistry {
    slots: RwLock<HashMap<String, Slot>>,
}

impl TargetRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new collection at `path` and returns it.
    ///
    /// Replaces whatever was registered at `path` before.
    pub fn insert_collection<E>(
        &self,
        path: impl Into<String>,
        collection: EntityCollection<E>,
    ) -> Arc<EntityCollection<E>>
    where
        E: Clone + Send + Sync + 'static,
    {
        let collection = Arc::new(collection);
        let target: Arc<dyn SyncTarget<E>> = collection.clone();
        self.insert_target(path, target);
        collection
    }

    /// Registers any sync target at `path`.
    pub fn insert_target<E: 'static>(&self, path: impl Into<String>, target: Arc<dyn SyncTarget<E>>) {
        self.slots.write().insert(
            path.into(),
            Slot {
                entity_type: type_name::<E>(),
                target: Box::new(target),
            },
        );
    }

    /// Looks up the target at `path` storing entities of type `E`.
    pub fn resolve<E: 'static>(&self, path: &str) -> Option<Arc<dyn SyncTarget<E>>> {
        self.slots
            .read()
            .get(path)
            .and_then(|slot| slot.target.downcast_ref::<Arc<dyn SyncTarget<E>>>())
            .cloned()
    }

    /// Removes the target at `path`. Returns true if one was registered.
    pub fn remove(&self, path: &str) -> bool {
        self.slots.write().remove(path).is_some()
    }

    /// Returns true if a target is registered at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.slots.read().contains_key(path)
    }

    /// Returns the entity type name registered at `path`.
    pub fn entity_type(&self, path: &str) -> Option<&'static str> {
        self.slots.read().get(path).map(|slot| slot.entity_type)
    }

    /// Returns every registered path, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.slots.read().keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("paths", &self.paths())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn json_id(value: &Value) -> Option<EntityId> {
        EntityId::from_field(value, "id")
    }

    #[test]
    fn upsert_inserts_then_replaces() {
        let collection = EntityCollection::<Value>::new();
        collection.upsert_one(json!({"id": 1, "name": "A"}), &json_id);
        collection.upsert_one(json!({"id": 2, "name": "B"}), &json_id);
        collection.upsert_one(json!({"id": 1, "title": "A2"}), &json_id);

        assert_eq!(collection.len(), 2);
        // Replacement is wholesale, not a merge.
        assert_eq!(
            collection.by_id(&1.into()),
            Some(json!({"id": 1, "title": "A2"}))
        );
        assert_eq!(collection.ids(), vec![EntityId::from(1), EntityId::from(2)]);
    }

    #[test]
    fn upsert_without_id_is_ignored() {
        let collection = EntityCollection::<Value>::new();
        assert_eq!(collection.upsert_one(json!({"name": "nameless"}), &json_id), None);
        assert!(collection.is_empty());
    }

    #[test]
    fn remove_one() {
        let collection = EntityCollection::<Value>::new();
        collection.upsert_one(json!({"id": "a"}), &json_id);
        collection.upsert_one(json!({"id": "b"}), &json_id);

        assert_eq!(collection.remove_one(&"a".into()), Some(json!({"id": "a"})));
        assert_eq!(collection.remove_one(&"a".into()), None);
        assert_eq!(collection.all(), vec![json!({"id": "b"})]);
        assert!(!collection.contains(&"a".into()));
    }

    #[test]
    fn registry_resolves_by_type() {
        let registry = TargetRegistry::new();
        let todos = registry.insert_collection("todos", EntityCollection::<Value>::new());

        let target = registry.resolve::<Value>("todos").unwrap();
        target.upsert_one(json!({"id": 9}), &json_id);
        assert_eq!(todos.len(), 1);

        assert!(registry.resolve::<String>("todos").is_none());
        assert!(registry.resolve::<Value>("missing").is_none());
        assert!(registry.entity_type("todos").unwrap().contains("Value"));
    }

    #[test]
    fn registry_remove_and_paths() {
        let registry = TargetRegistry::new();
        registry.insert_collection("b", EntityCollection::<Value>::new());
        registry.insert_collection("a", EntityCollection::<Value>::new());
        assert_eq!(registry.paths(), vec!["a".to_string(), "b".to_string()]);

        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(!registry.contains("a"));
    }
}
