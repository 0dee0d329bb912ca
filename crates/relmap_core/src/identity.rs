//! Identity map: one instance per (type, key) per unit of work.

use crate::types::{EntityKey, EntityRef, TypeId};
use std::collections::HashMap;

/// Per-session cache guaranteeing at most one in-memory instance per
/// (type, key) pair.
///
/// This is the sole mechanism preventing two rows for the same entity
/// from materializing as diverging object graphs: every row resolution
/// checks [`IdentityMap::get`] before allocating, and registers a
/// freshly allocated instance with [`IdentityMap::track`].
#[derive(Debug, Default)]
pub struct IdentityMap {
    entries: HashMap<(TypeId, EntityKey), EntityRef>,
}

impl IdentityMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tracked instance for (type, key), if any.
    #[must_use]
    pub fn get(&self, type_id: TypeId, key: EntityKey) -> Option<EntityRef> {
        self.entries.get(&(type_id, key)).copied()
    }

    /// Tracks an instance under (type, key).
    ///
    /// If the slot is already occupied the first instance wins; callers
    /// must check [`IdentityMap::get`] first.
    pub fn track(&mut self, type_id: TypeId, key: EntityKey, entity: EntityRef) -> EntityRef {
        let slot = self.entries.entry((type_id, key)).or_insert(entity);
        debug_assert_eq!(*slot, entity, "identity slot already taken");
        *slot
    }

    /// Removes tracking for (type, key).
    pub fn forget(&mut self, type_id: TypeId, key: EntityKey) {
        self.entries.remove(&(type_id, key));
    }

    /// Empties the map.
    ///
    /// The caller is responsible for having flushed pending writes
    /// first; clearing with unflushed staged state pending loses those
    /// edits.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of tracked instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: TypeId = TypeId::new(0);

    #[test]
    fn track_keeps_the_first_instance() {
        let mut map = IdentityMap::new();
        let key = EntityKey::new(1);
        let first = map.track(T, key, EntityRef::new(10));
        assert_eq!(first, EntityRef::new(10));
        assert_eq!(map.get(T, key), Some(EntityRef::new(10)));
    }

    #[test]
    fn distinct_types_do_not_collide() {
        let mut map = IdentityMap::new();
        let key = EntityKey::new(1);
        map.track(T, key, EntityRef::new(1));
        map.track(TypeId::new(1), key, EntityRef::new(2));

        assert_eq!(map.get(T, key), Some(EntityRef::new(1)));
        assert_eq!(map.get(TypeId::new(1), key), Some(EntityRef::new(2)));
    }

    #[test]
    fn forget_removes_tracking() {
        let mut map = IdentityMap::new();
        let key = EntityKey::new(1);
        map.track(T, key, EntityRef::new(1));
        map.forget(T, key);
        assert!(map.get(T, key).is_none());
    }

    #[test]
    fn clear_empties_the_map() {
        let mut map = IdentityMap::new();
        map.track(T, EntityKey::new(1), EntityRef::new(1));
        map.track(T, EntityKey::new(2), EntityRef::new(2));
        map.clear();
        assert!(map.is_empty());
    }
}
