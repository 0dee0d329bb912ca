//! Core identifier types.

use std::fmt;

/// Primary key of an entity.
///
/// Keys are either assigned by the caller before persist or drawn from
/// the store's key sequence at persist time, per the entity type's key
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey(pub i64);

impl EntityKey {
    /// Creates a key from its raw value.
    #[must_use]
    pub const fn new(key: i64) -> Self {
        Self(key)
    }

    /// Returns the raw key value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key:{}", self.0)
    }
}

/// Identifier of a registered entity type.
///
/// Assigned by the registry in registration order and stable for the
/// life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Creates a type ID from its raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type:{}", self.0)
    }
}

/// Handle to an entity instance in a session's arena.
///
/// Handle equality is instance identity: two lookups that resolve to
/// the same (type, key) within one unit of work yield equal handles.
/// Handles are only meaningful against the session that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityRef(pub u32);

impl EntityRef {
    /// Creates a handle from its raw slot index.
    #[must_use]
    pub const fn new(slot: u32) -> Self {
        Self(slot)
    }

    /// Returns the raw slot index.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ordering() {
        assert!(EntityKey::new(1) < EntityKey::new(2));
    }

    #[test]
    fn ref_display() {
        assert_eq!(format!("{}", EntityRef::new(7)), "entity:7");
    }
}
