//! # relmap model
//!
//! A sample domain wired onto the relmap engine: people (with a geek
//! specialization), their id cards and phones, and the projects geeks
//! work on. The crate exists to exercise the engine end to end; the
//! mapping mirrors a classic object-relational textbook schema:
//!
//! - `person` rows carry a `kind` discriminator (`person` or `geek`)
//! - `person.id_card_id` owns a one-to-one reference to `id_card`
//! - `phone.person_id` owns the many-to-one side of `person.phones`
//! - `project_geek` links projects and geeks both ways
//! - a project's period embeds as the `period_start` and `period_end`
//!   columns

use chrono::{NaiveDate, NaiveDateTime};
use relmap_core::{
    CoreResult, EntityDescriptor, EntityRef, EntityRegistry, FieldKind, RelationshipDescriptor,
    Session, SqlValue, VariantDescriptor,
};
use relmap_store::{MemoryStore, StoreBackend};
use std::sync::Arc;

/// A date range embedded into the owning row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    /// Start of the range.
    pub start: NaiveDateTime,
    /// End of the range.
    pub end: NaiveDateTime,
}

impl Period {
    /// Creates a period.
    #[must_use]
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }
}

/// Midnight of the given calendar day.
///
/// # Panics
///
/// Panics on an out-of-range date, such as February 30th.
#[must_use]
pub fn date(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .expect("valid calendar date")
        .and_hms_opt(0, 0, 0)
        .expect("midnight exists on every day")
}

/// Builds the registry for the sample domain.
///
/// # Panics
///
/// Panics on duplicate registrations, which would be a bug in this
/// module, not in the caller.
#[must_use]
pub fn registry() -> Arc<EntityRegistry> {
    Arc::new(build_registry().expect("sample registry is internally consistent"))
}

fn build_registry() -> CoreResult<EntityRegistry> {
    let mut registry = EntityRegistry::new();
    registry.register(
        EntityDescriptor::new("person", "person")
            .field("first_name", "first_name", FieldKind::Text)
            .field("last_name", "last_name", FieldKind::Text)
            .discriminator(
                "kind",
                vec![VariantDescriptor::new("geek").field(
                    "favourite_language",
                    "favourite_language",
                    FieldKind::Text,
                )],
            )
            .relationship(
                RelationshipDescriptor::one_to_one("id_card", "id_card")
                    .owning_fk("id_card_id")
                    .cascade()
                    .eager(),
            )
            .relationship(
                RelationshipDescriptor::one_to_many("phones", "phone")
                    .inverse_of("person")
                    .cascade()
                    .eager(),
            )
            .relationship(
                RelationshipDescriptor::many_to_many("projects", "project").inverse_of("geeks"),
            ),
    )?;
    registry.register(
        EntityDescriptor::new("id_card", "id_card")
            .field("id_number", "id_number", FieldKind::Text)
            .field("issue_date", "issue_date", FieldKind::Timestamp),
    )?;
    registry.register(
        EntityDescriptor::new("phone", "phone")
            .field("number", "number", FieldKind::Text)
            .relationship(
                RelationshipDescriptor::many_to_one("person", "person")
                    .owning_fk("person_id")
                    .inverse_of("phones"),
            ),
    )?;
    registry.register(
        EntityDescriptor::new("project", "project")
            .field("title", "title", FieldKind::Text)
            .field("project_type", "project_type", FieldKind::Text)
            .field("period.start_date", "period_start", FieldKind::Timestamp)
            .field("period.end_date", "period_end", FieldKind::Timestamp)
            .relationship(
                RelationshipDescriptor::many_to_many("geeks", "geek")
                    .owning_link("project_geek", "project_id", "geek_id")
                    .inverse_of("projects"),
            ),
    )?;
    Ok(registry)
}

/// An in-memory backend with the sample schema declared.
#[must_use]
pub fn store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store.define_table("person", Some("id"));
    store.define_table("id_card", Some("id"));
    store.define_table("phone", Some("id"));
    store.define_table("project", Some("id"));
    store.define_table("project_geek", None);
    store
}

/// A session over the sample domain and a fresh in-memory store.
#[must_use]
pub fn session() -> Session<MemoryStore> {
    Session::new(registry(), store())
}

/// Creates a person.
///
/// # Errors
///
/// Propagates engine errors; none are expected against this registry.
pub fn new_person<S: StoreBackend>(
    session: &mut Session<S>,
    first_name: &str,
    last_name: &str,
) -> CoreResult<EntityRef> {
    let person = session.create("person")?;
    session.set(person, "first_name", SqlValue::Text(first_name.into()))?;
    session.set(person, "last_name", SqlValue::Text(last_name.into()))?;
    Ok(person)
}

/// Creates a geek, the specialization of person that joins projects.
///
/// # Errors
///
/// Propagates engine errors; none are expected against this registry.
pub fn new_geek<S: StoreBackend>(
    session: &mut Session<S>,
    first_name: &str,
    last_name: &str,
    favourite_language: &str,
) -> CoreResult<EntityRef> {
    let geek = session.create("geek")?;
    session.set(geek, "first_name", SqlValue::Text(first_name.into()))?;
    session.set(geek, "last_name", SqlValue::Text(last_name.into()))?;
    session.set(
        geek,
        "favourite_language",
        SqlValue::Text(favourite_language.into()),
    )?;
    Ok(geek)
}

/// Creates an id card.
///
/// # Errors
///
/// Propagates engine errors; none are expected against this registry.
pub fn new_id_card<S: StoreBackend>(
    session: &mut Session<S>,
    id_number: &str,
    issue_date: NaiveDateTime,
) -> CoreResult<EntityRef> {
    let card = session.create("id_card")?;
    session.set(card, "id_number", SqlValue::Text(id_number.into()))?;
    session.set(card, "issue_date", SqlValue::Timestamp(issue_date))?;
    Ok(card)
}

/// Creates a phone.
///
/// # Errors
///
/// Propagates engine errors; none are expected against this registry.
pub fn new_phone<S: StoreBackend>(
    session: &mut Session<S>,
    number: &str,
) -> CoreResult<EntityRef> {
    let phone = session.create("phone")?;
    session.set(phone, "number", SqlValue::Text(number.into()))?;
    Ok(phone)
}

/// Creates a project with its embedded period.
///
/// # Errors
///
/// Propagates engine errors; none are expected against this registry.
pub fn new_project<S: StoreBackend>(
    session: &mut Session<S>,
    title: &str,
    project_type: &str,
    period: Period,
) -> CoreResult<EntityRef> {
    let project = session.create("project")?;
    session.set(project, "title", SqlValue::Text(title.into()))?;
    session.set(project, "project_type", SqlValue::Text(project_type.into()))?;
    session.set(project, "period.start_date", SqlValue::Timestamp(period.start))?;
    session.set(project, "period.end_date", SqlValue::Timestamp(period.end))?;
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_types_and_variants() {
        let registry = registry();
        assert_eq!(registry.len(), 4);
        assert!(registry.resolve("geek").unwrap().variant.is_some());
        assert_eq!(registry.describe("geek").unwrap().table, "person");
    }

    #[test]
    fn date_is_midnight() {
        let d = date(2015, 1, 1);
        assert_eq!(d.format("%H:%M:%S").to_string(), "00:00:00");
    }

    #[test]
    fn embedded_period_fields_map_to_flat_columns() {
        let registry = registry();
        let project = registry.describe("project").unwrap();
        assert_eq!(
            project
                .field_for("period.start_date", None)
                .map(|f| f.column),
            Some("period_start")
        );
    }
}
