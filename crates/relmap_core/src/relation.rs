//! Relationship synchronizer.
//!
//! Keeps both sides of a bidirectional association consistent at the
//! moment either side is mutated. Propagation is single-step: the
//! forward mutation is applied, then the symmetric inverse mutation is
//! written directly, without re-entering the synchronizer, so there is
//! no mutual recursion to bound.

use crate::entity::{EntityArena, EntityStatus};
use crate::error::{CoreError, CoreResult};
use crate::registry::{Cardinality, EntityRegistry, RelationshipDescriptor};
use crate::types::EntityRef;

/// Resolved context of one `link`/`unlink` call.
struct Edge {
    rel: &'static str,
    inverse: Option<&'static str>,
    forward_collection: bool,
    forward_owning_fk: bool,
    forward_owning_link: bool,
    inverse_collection: bool,
    inverse_owning_fk: bool,
    inverse_owning_link: bool,
}

fn resolve_edge(
    registry: &EntityRegistry,
    arena: &EntityArena,
    owner: EntityRef,
    rel: &str,
    target: EntityRef,
) -> CoreResult<Edge> {
    let owner_rec = arena.get(owner).ok_or(CoreError::InvalidHandle)?;
    let target_rec = arena.get(target).ok_or(CoreError::InvalidHandle)?;
    let owner_desc = registry.descriptor(owner_rec.type_id);
    let reld = owner_desc
        .relationship_for(rel)
        .ok_or_else(|| CoreError::unknown_relationship(owner_desc.name, rel))?;

    let expected = registry.resolve(reld.target)?;
    let target_desc = registry.descriptor(target_rec.type_id);
    let variant_ok = expected
        .variant
        .map_or(true, |v| target_rec.variant == Some(v));
    if target_rec.type_id != expected.type_id || !variant_ok {
        return Err(CoreError::TypeMismatch {
            entity: owner_desc.name.into(),
            field: reld.name.into(),
            expected: reld.target,
            actual: target_rec.variant.unwrap_or(target_desc.name),
        });
    }

    let inverse_rel: Option<&RelationshipDescriptor> = reld
        .inverse
        .and_then(|inv| target_desc.relationship_for(inv));

    Ok(Edge {
        rel: reld.name,
        inverse: inverse_rel.map(|r| r.name),
        forward_collection: reld.cardinality.is_collection(),
        forward_owning_fk: reld.owning && reld.fk_column.is_some(),
        forward_owning_link: reld.owning && reld.cardinality == Cardinality::ManyToMany,
        inverse_collection: inverse_rel.is_some_and(|r| r.cardinality.is_collection()),
        inverse_owning_fk: inverse_rel.is_some_and(|r| r.owning && r.fk_column.is_some()),
        inverse_owning_link: inverse_rel
            .is_some_and(|r| r.owning && r.cardinality == Cardinality::ManyToMany),
    })
}

/// Queues a many-to-many membership for the next flush if the owning
/// record is already managed; new records flush their full collection.
fn queue_link(arena: &mut EntityArena, owner: EntityRef, rel: &'static str, member: EntityRef) {
    if let Some(rec) = arena.get_mut(owner) {
        rec.touch();
        if rec.status == EntityStatus::Managed
            && !rec.pending_links.contains(&(rel, member))
        {
            rec.pending_links.push((rel, member));
        }
    }
}

/// Removes `member` from the collection `rel` on `holder`, or clears
/// the scalar `rel` if it currently points at `member`.
fn retract(arena: &mut EntityArena, holder: EntityRef, rel: &'static str, member: EntityRef) {
    if let Some(rec) = arena.get_mut(holder) {
        if let Some(members) = rec.to_many.get_mut(rel) {
            members.retain(|m| *m != member);
        }
        if rec.to_one.get(rel) == Some(&Some(member)) {
            rec.to_one.insert(rel, None);
        }
        rec.pending_links.retain(|entry| *entry != (rel, member));
    }
}

/// Adds a reference from `owner` to `target` through relationship
/// `rel`, updating the inverse side to match.
///
/// Idempotent: re-linking an already-consistent pair is a no-op.
/// Re-targeting a to-one reference detaches the previous target's
/// inverse side first.
///
/// # Errors
///
/// Fails on stale handles, unknown relationship names, or a target of
/// the wrong type.
pub(crate) fn link(
    registry: &EntityRegistry,
    arena: &mut EntityArena,
    owner: EntityRef,
    rel: &str,
    target: EntityRef,
) -> CoreResult<()> {
    let edge = resolve_edge(registry, arena, owner, rel, target)?;

    // Forward side.
    if edge.forward_collection {
        {
            let rec = arena.get_mut(owner).ok_or(CoreError::InvalidHandle)?;
            let members = rec.to_many.entry(edge.rel).or_default();
            if members.contains(&target) {
                return Ok(());
            }
            members.push(target);
        }
        if edge.forward_owning_link {
            queue_link(arena, owner, edge.rel, target);
        }
    } else {
        let rec = arena.get_mut(owner).ok_or(CoreError::InvalidHandle)?;
        let previous = rec.to_one.get(&edge.rel).copied().flatten();
        if previous == Some(target) {
            return Ok(());
        }
        rec.to_one.insert(edge.rel, Some(target));
        if edge.forward_owning_fk {
            rec.touch();
        }
        // The previous target's inverse side no longer references us.
        if let (Some(prev), Some(inv)) = (previous, edge.inverse) {
            retract(arena, prev, inv, owner);
        }
    }

    // Inverse side, written directly: no second synchronizer pass.
    let Some(inv) = edge.inverse else {
        return Ok(());
    };
    if edge.inverse_collection {
        let added = {
            let rec = arena.get_mut(target).ok_or(CoreError::InvalidHandle)?;
            let members = rec.to_many.entry(inv).or_default();
            if members.contains(&owner) {
                false
            } else {
                members.push(owner);
                true
            }
        };
        if added && edge.inverse_owning_link {
            queue_link(arena, target, inv, owner);
        }
    } else {
        let rec = arena.get_mut(target).ok_or(CoreError::InvalidHandle)?;
        let previous = rec.to_one.get(&inv).copied().flatten();
        if previous != Some(owner) {
            rec.to_one.insert(inv, Some(owner));
            if edge.inverse_owning_fk {
                rec.touch();
            }
            // A scalar inverse can only point at one owner: drop the
            // membership on the owner it pointed at before.
            if let Some(prev) = previous {
                retract(arena, prev, edge.rel, target);
            }
        }
    }
    Ok(())
}

/// Removes the reference from `owner` to `target` through `rel`,
/// clearing the inverse side to match. A no-op when the pair is not
/// linked.
///
/// Removal only affects in-memory state and unflushed link rows; the
/// store write set has no delete statement.
///
/// # Errors
///
/// Fails on stale handles, unknown relationship names, or a target of
/// the wrong type.
pub(crate) fn unlink(
    registry: &EntityRegistry,
    arena: &mut EntityArena,
    owner: EntityRef,
    rel: &str,
    target: EntityRef,
) -> CoreResult<()> {
    let edge = resolve_edge(registry, arena, owner, rel, target)?;

    let rec = arena.get_mut(owner).ok_or(CoreError::InvalidHandle)?;
    if edge.forward_collection {
        let present = rec
            .to_many
            .get(&edge.rel)
            .is_some_and(|m| m.contains(&target));
        if !present {
            return Ok(());
        }
        if edge.forward_owning_link || edge.forward_owning_fk {
            rec.touch();
        }
    } else {
        if rec.to_one.get(&edge.rel).copied().flatten() != Some(target) {
            return Ok(());
        }
        if edge.forward_owning_fk {
            rec.touch();
        }
    }
    retract(arena, owner, edge.rel, target);

    if let Some(inv) = edge.inverse {
        if edge.inverse_owning_fk || edge.inverse_owning_link {
            if let Some(rec) = arena.get_mut(target) {
                rec.touch();
            }
        }
        retract(arena, target, inv, owner);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRecord;
    use crate::registry::{EntityDescriptor, RelationshipDescriptor, VariantDescriptor};
    use crate::types::TypeId;

    fn registry() -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        registry
            .register(
                EntityDescriptor::new("person", "person")
                    .discriminator("kind", vec![VariantDescriptor::new("geek")])
                    .relationship(
                        RelationshipDescriptor::one_to_many("phones", "phone")
                            .inverse_of("person"),
                    )
                    .relationship(
                        RelationshipDescriptor::many_to_many("projects", "project")
                            .inverse_of("geeks"),
                    ),
            )
            .unwrap();
        registry
            .register(EntityDescriptor::new("phone", "phone").relationship(
                RelationshipDescriptor::many_to_one("person", "person")
                    .owning_fk("person_id")
                    .inverse_of("phones"),
            ))
            .unwrap();
        registry
            .register(EntityDescriptor::new("project", "project").relationship(
                RelationshipDescriptor::many_to_many("geeks", "geek")
                    .owning_link("project_geek", "project_id", "geek_id")
                    .inverse_of("projects"),
            ))
            .unwrap();
        registry
    }

    struct Fixture {
        registry: EntityRegistry,
        arena: EntityArena,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: registry(),
                arena: EntityArena::new(),
            }
        }

        fn spawn(&mut self, name: &str) -> EntityRef {
            let target = self.registry.resolve(name).unwrap();
            self.arena
                .alloc(EntityRecord::new(target.type_id, target.variant))
        }

        fn link(&mut self, owner: EntityRef, rel: &str, target: EntityRef) {
            link(&self.registry, &mut self.arena, owner, rel, target).unwrap();
        }

        fn unlink(&mut self, owner: EntityRef, rel: &str, target: EntityRef) {
            unlink(&self.registry, &mut self.arena, owner, rel, target).unwrap();
        }

        fn linked(&self, person: EntityRef, phone: EntityRef) -> (bool, bool) {
            let collection = self
                .arena
                .get(person)
                .unwrap()
                .to_many("phones")
                .contains(&phone);
            let scalar = self.arena.get(phone).unwrap().to_one("person") == Some(person);
            (collection, scalar)
        }
    }

    #[test]
    fn linking_from_collection_side_sets_scalar() {
        let mut fx = Fixture::new();
        let person = fx.spawn("person");
        let phone = fx.spawn("phone");

        fx.link(person, "phones", phone);
        assert_eq!(fx.linked(person, phone), (true, true));
    }

    #[test]
    fn linking_from_scalar_side_fills_collection() {
        let mut fx = Fixture::new();
        let person = fx.spawn("person");
        let phone = fx.spawn("phone");

        fx.link(phone, "person", person);
        assert_eq!(fx.linked(person, phone), (true, true));
    }

    #[test]
    fn relinking_is_a_no_op() {
        let mut fx = Fixture::new();
        let person = fx.spawn("person");
        let phone = fx.spawn("phone");

        fx.link(person, "phones", phone);
        fx.link(person, "phones", phone);
        fx.link(phone, "person", person);

        assert_eq!(fx.arena.get(person).unwrap().to_many("phones").len(), 1);
    }

    #[test]
    fn retargeting_scalar_detaches_previous_collection() {
        let mut fx = Fixture::new();
        let alice = fx.spawn("person");
        let bob = fx.spawn("person");
        let phone = fx.spawn("phone");

        fx.link(phone, "person", alice);
        fx.link(phone, "person", bob);

        assert_eq!(fx.linked(alice, phone), (false, false));
        assert_eq!(fx.linked(bob, phone), (true, true));
    }

    #[test]
    fn moving_child_between_collections_moves_scalar() {
        let mut fx = Fixture::new();
        let alice = fx.spawn("person");
        let bob = fx.spawn("person");
        let phone = fx.spawn("phone");

        fx.link(alice, "phones", phone);
        fx.link(bob, "phones", phone);

        assert_eq!(fx.linked(alice, phone), (false, false));
        assert_eq!(fx.linked(bob, phone), (true, true));
    }

    #[test]
    fn unlink_clears_both_sides() {
        let mut fx = Fixture::new();
        let person = fx.spawn("person");
        let phone = fx.spawn("phone");

        fx.link(person, "phones", phone);
        fx.unlink(phone, "person", person);

        assert_eq!(fx.linked(person, phone), (false, false));
    }

    #[test]
    fn unlink_of_unlinked_pair_is_a_no_op() {
        let mut fx = Fixture::new();
        let person = fx.spawn("person");
        let phone = fx.spawn("phone");
        fx.unlink(person, "phones", phone);
        assert_eq!(fx.linked(person, phone), (false, false));
    }

    #[test]
    fn many_to_many_updates_both_collections() {
        let mut fx = Fixture::new();
        let geek = fx.spawn("geek");
        let project = fx.spawn("project");

        fx.link(project, "geeks", geek);

        assert!(fx.arena.get(project).unwrap().to_many("geeks").contains(&geek));
        assert!(fx
            .arena
            .get(geek)
            .unwrap()
            .to_many("projects")
            .contains(&project));
    }

    #[test]
    fn many_to_many_links_from_either_side() {
        let mut fx = Fixture::new();
        let geek = fx.spawn("geek");
        let project = fx.spawn("project");

        fx.link(geek, "projects", project);

        assert!(fx.arena.get(project).unwrap().to_many("geeks").contains(&geek));
        assert!(fx
            .arena
            .get(geek)
            .unwrap()
            .to_many("projects")
            .contains(&project));
    }

    #[test]
    fn geek_relationship_rejects_plain_person() {
        let mut fx = Fixture::new();
        let person = fx.spawn("person");
        let project = fx.spawn("project");

        let err = link(&fx.registry, &mut fx.arena, project, "geeks", person).unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
    }

    #[test]
    fn unknown_relationship_is_an_error() {
        let mut fx = Fixture::new();
        let a = fx.spawn("person");
        let b = fx.spawn("phone");
        let err = link(&fx.registry, &mut fx.arena, a, "gadgets", b).unwrap_err();
        assert!(matches!(err, CoreError::UnknownRelationship { .. }));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Link(usize, usize),
            Unlink(usize, usize),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0..3usize, 0..4usize).prop_map(|(p, c)| Op::Link(p, c)),
                (0..3usize, 0..4usize).prop_map(|(p, c)| Op::Unlink(p, c)),
            ]
        }

        proptest! {
            #[test]
            fn symmetry_holds_after_any_mutation_sequence(ops in prop::collection::vec(op(), 0..40)) {
                let mut fx = Fixture::new();
                let persons: Vec<_> = (0..3).map(|_| fx.spawn("person")).collect();
                let phones: Vec<_> = (0..4).map(|_| fx.spawn("phone")).collect();

                for op in ops {
                    match op {
                        Op::Link(p, c) => fx.link(persons[p], "phones", phones[c]),
                        Op::Unlink(p, c) => fx.unlink(phones[c], "person", persons[p]),
                    }
                    for &person in &persons {
                        for &phone in &phones {
                            let (collection, scalar) = fx.linked(person, phone);
                            prop_assert_eq!(collection, scalar);
                        }
                    }
                    for &phone in &phones {
                        let holders = persons
                            .iter()
                            .filter(|&&p| fx.linked(p, phone).0)
                            .count();
                        prop_assert!(holders <= 1);
                    }
                }
            }
        }
    }
}
