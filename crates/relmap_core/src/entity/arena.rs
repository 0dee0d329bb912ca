//! Session-owned entity arena.

use crate::entity::record::EntityRecord;
use crate::types::EntityRef;

/// Arena of entity records addressed by stable handles.
///
/// Slots are never reclaimed during a session's life, so every handle
/// handed out stays valid until the session is dropped. Detaching an
/// entity removes it from the identity map, not from the arena.
#[derive(Debug, Default)]
pub struct EntityArena {
    records: Vec<EntityRecord>,
}

impl EntityArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record and returns its handle.
    pub fn alloc(&mut self, record: EntityRecord) -> EntityRef {
        let slot = u32::try_from(self.records.len()).unwrap_or(u32::MAX);
        self.records.push(record);
        EntityRef::new(slot)
    }

    /// Resolves a handle.
    #[must_use]
    pub fn get(&self, entity: EntityRef) -> Option<&EntityRecord> {
        self.records.get(entity.as_u32() as usize)
    }

    /// Resolves a handle mutably.
    pub fn get_mut(&mut self, entity: EntityRef) -> Option<&mut EntityRecord> {
        self.records.get_mut(entity.as_u32() as usize)
    }

    /// Iterates all records with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (EntityRef, &EntityRecord)> {
        self.records
            .iter()
            .enumerate()
            .map(|(slot, record)| (EntityRef::new(slot as u32), record))
    }

    /// Number of records in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the arena holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
