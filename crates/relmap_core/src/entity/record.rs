//! In-memory entity records.

use crate::types::{EntityKey, EntityRef, TypeId};
use relmap_store::SqlValue;
use std::collections::BTreeMap;

/// Tracking status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    /// Created in memory, not yet flushed to the store.
    New,
    /// Backed by a store row.
    Managed,
}

/// One entity instance.
///
/// Records live in the session arena and reference each other through
/// [`EntityRef`] handles, never through owned pointers, so cyclic
/// graphs stay acyclic at the ownership level.
///
/// Relationship state distinguishes "never loaded" (no entry) from an
/// explicit value: an absent to-one entry means the raw foreign key in
/// `fk_keys` is still authoritative.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    /// Base entity type.
    pub type_id: TypeId,
    /// Variant name, for rows of a specialization.
    pub variant: Option<&'static str>,
    /// Primary key; `None` until persist assigns one.
    pub key: Option<EntityKey>,
    /// Scalar field values, keyed by field path.
    pub fields: BTreeMap<&'static str, SqlValue>,
    /// To-one relationship state, keyed by relationship name.
    pub to_one: BTreeMap<&'static str, Option<EntityRef>>,
    /// To-many relationship state, keyed by relationship name.
    pub to_many: BTreeMap<&'static str, Vec<EntityRef>>,
    /// Raw foreign keys loaded from the store for owning to-one sides.
    pub fk_keys: BTreeMap<&'static str, Option<EntityKey>>,
    /// Many-to-many memberships added while managed, not yet flushed.
    pub pending_links: Vec<(&'static str, EntityRef)>,
    /// Tracking status.
    pub status: EntityStatus,
    /// Whether scalar or owning-side state changed since the last flush.
    pub dirty: bool,
}

impl EntityRecord {
    /// Creates an untracked record of the given type and variant.
    #[must_use]
    pub fn new(type_id: TypeId, variant: Option<&'static str>) -> Self {
        Self {
            type_id,
            variant,
            key: None,
            fields: BTreeMap::new(),
            to_one: BTreeMap::new(),
            to_many: BTreeMap::new(),
            fk_keys: BTreeMap::new(),
            pending_links: Vec::new(),
            status: EntityStatus::New,
            dirty: false,
        }
    }

    /// Returns a scalar field value; `Null` when unset.
    #[must_use]
    pub fn field(&self, name: &str) -> SqlValue {
        self.fields.get(name).cloned().unwrap_or(SqlValue::Null)
    }

    /// Returns the to-one target for a relationship, flattening the
    /// "never loaded" case to `None`.
    #[must_use]
    pub fn to_one(&self, name: &str) -> Option<EntityRef> {
        self.to_one.get(name).copied().flatten()
    }

    /// Returns the to-many members for a relationship (empty when
    /// never loaded).
    #[must_use]
    pub fn to_many(&self, name: &str) -> &[EntityRef] {
        self.to_many.get(name).map_or(&[], Vec::as_slice)
    }

    /// Marks the record dirty if it is already managed.
    pub fn touch(&mut self) {
        if self.status == EntityStatus::Managed {
            self.dirty = true;
        }
    }
}
