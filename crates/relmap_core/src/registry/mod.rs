//! Entity registry: the static metadata the engine maps through.

mod descriptor;

pub use descriptor::{
    Cardinality, DiscriminatorSpec, EntityDescriptor, FetchMode, FieldDescriptor, FieldKind,
    KeyPolicy, KeySpec, LinkTable, RelationshipDescriptor, VariantDescriptor,
};

use crate::error::{CoreError, CoreResult};
use crate::types::TypeId;
use std::collections::HashMap;

/// Resolution of an entity type or variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeTarget {
    /// The base entity type.
    pub type_id: TypeId,
    /// The variant, when the name addressed a specialization.
    pub variant: Option<&'static str>,
}

/// Registry of entity descriptors.
///
/// Populated once at process start; thereafter shared immutably (an
/// `Arc` suffices, no locking) across sessions.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    types: Vec<EntityDescriptor>,
    by_name: HashMap<&'static str, TypeId>,
    by_variant: HashMap<&'static str, (TypeId, &'static str)>,
}

impl EntityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an entity descriptor.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::DuplicateEntityType`] if the name, or
    /// one of its variant names, is already taken.
    pub fn register(&mut self, descriptor: EntityDescriptor) -> CoreResult<TypeId> {
        let name = descriptor.name;
        if self.by_name.contains_key(name) || self.by_variant.contains_key(name) {
            return Err(CoreError::DuplicateEntityType { name: name.into() });
        }
        let type_id = TypeId::new(u32::try_from(self.types.len()).unwrap_or(u32::MAX));
        if let Some(spec) = &descriptor.discriminator {
            for variant in &spec.variants {
                if self.by_name.contains_key(variant.name)
                    || self.by_variant.contains_key(variant.name)
                {
                    return Err(CoreError::DuplicateEntityType {
                        name: variant.name.into(),
                    });
                }
                self.by_variant.insert(variant.name, (type_id, variant.name));
            }
        }
        self.by_name.insert(name, type_id);
        self.types.push(descriptor);
        Ok(type_id)
    }

    /// Returns the descriptor for a registered type or variant name.
    ///
    /// Variant names resolve to their base descriptor.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::UnknownEntityType`] on a registry miss.
    pub fn describe(&self, name: &str) -> CoreResult<&EntityDescriptor> {
        let target = self.resolve(name)?;
        Ok(self.descriptor(target.type_id))
    }

    /// Resolves a type or variant name to its target.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::UnknownEntityType`] on a registry miss.
    pub fn resolve(&self, name: &str) -> CoreResult<TypeTarget> {
        if let Some(&type_id) = self.by_name.get(name) {
            return Ok(TypeTarget {
                type_id,
                variant: None,
            });
        }
        if let Some(&(type_id, variant)) = self.by_variant.get(name) {
            return Ok(TypeTarget {
                type_id,
                variant: Some(variant),
            });
        }
        Err(CoreError::unknown_entity_type(name))
    }

    /// Returns the descriptor for a type ID.
    ///
    /// # Panics
    ///
    /// Panics if the ID did not come from this registry.
    #[must_use]
    pub fn descriptor(&self, type_id: TypeId) -> &EntityDescriptor {
        &self.types[type_id.as_u32() as usize]
    }

    /// Iterates all registered descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.types.iter()
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        registry
            .register(
                EntityDescriptor::new("person", "person").discriminator(
                    "kind",
                    vec![VariantDescriptor::new("geek").field(
                        "favourite_language",
                        "favourite_language",
                        FieldKind::Text,
                    )],
                ),
            )
            .unwrap();
        registry
            .register(EntityDescriptor::new("phone", "phone"))
            .unwrap();
        registry
    }

    #[test]
    fn describe_known_type() {
        let registry = registry();
        assert_eq!(registry.describe("phone").unwrap().table, "phone");
    }

    #[test]
    fn unknown_type_is_an_error() {
        let registry = registry();
        let err = registry.describe("spaceship").unwrap_err();
        assert!(matches!(err, CoreError::UnknownEntityType { .. }));
    }

    #[test]
    fn variant_resolves_to_base_descriptor() {
        let registry = registry();
        let target = registry.resolve("geek").unwrap();
        assert_eq!(target.variant, Some("geek"));
        assert_eq!(registry.descriptor(target.type_id).name, "person");
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = registry();
        let err = registry
            .register(EntityDescriptor::new("phone", "phone2"))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateEntityType { .. }));
    }

    #[test]
    fn variant_name_collision_fails() {
        let mut registry = registry();
        let err = registry
            .register(EntityDescriptor::new("geek", "geeks"))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateEntityType { .. }));
    }
}
