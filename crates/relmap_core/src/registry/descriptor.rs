//! Static entity type descriptors.

use relmap_store::SqlValue;

/// Shape of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit float.
    Real,
    /// Boolean.
    Boolean,
    /// UTF-8 text.
    Text,
    /// Date and time with second precision.
    Timestamp,
}

impl FieldKind {
    /// Returns `true` if `value` fits this kind. Null fits every kind.
    #[must_use]
    pub fn accepts(self, value: &SqlValue) -> bool {
        matches!(
            (self, value),
            (_, SqlValue::Null)
                | (Self::Integer, SqlValue::Integer(_))
                | (Self::Real, SqlValue::Real(_))
                | (Self::Boolean, SqlValue::Boolean(_))
                | (Self::Text, SqlValue::Text(_))
                | (Self::Timestamp, SqlValue::Timestamp(_))
        )
    }

    /// Name of the kind, for diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::Timestamp => "timestamp",
        }
    }
}

/// How an entity type obtains its primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPolicy {
    /// The caller assigns the key before persist.
    Assigned,
    /// The store's key sequence assigns the key at persist time.
    Generated,
}

/// Cardinality of a relationship, seen from the declaring side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Scalar reference, unique on both sides.
    OneToOne,
    /// Scalar reference to a parent holding a collection.
    ManyToOne,
    /// Collection of children, each holding a scalar back-reference.
    OneToMany,
    /// Collection on both sides, stored through a link table.
    ManyToMany,
}

impl Cardinality {
    /// Returns `true` if the declaring side holds a collection.
    #[must_use]
    pub fn is_collection(self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }
}

/// When a relationship is materialized by queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Populated in the same query execution as the owner.
    Eager,
    /// Left as an unpopulated placeholder.
    Lazy,
}

/// A scalar field of an entity type.
///
/// Embedded value objects flatten to fields with dotted names (for
/// example `period.start_date` stored in column `period_start`); they
/// carry no identity of their own.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Field path, dotted for embedded value-object members.
    pub name: &'static str,
    /// Store column the field maps to.
    pub column: &'static str,
    /// Declared value shape.
    pub kind: FieldKind,
}

impl FieldDescriptor {
    /// Creates a field descriptor.
    #[must_use]
    pub const fn new(name: &'static str, column: &'static str, kind: FieldKind) -> Self {
        Self { name, column, kind }
    }
}

/// Primary key mapping of an entity type.
#[derive(Debug, Clone)]
pub struct KeySpec {
    /// Field path callers address the key by.
    pub name: &'static str,
    /// Store column the key maps to.
    pub column: &'static str,
    /// How the key is obtained.
    pub policy: KeyPolicy,
}

/// Link table mapping for the owning side of a many-to-many.
#[derive(Debug, Clone)]
pub struct LinkTable {
    /// Link table name.
    pub table: &'static str,
    /// Column holding the owning side's key.
    pub owner_column: &'static str,
    /// Column holding the target side's key.
    pub target_column: &'static str,
}

/// One relationship of an entity type.
///
/// The owning side carries the foreign key column (to-one) or the link
/// table (many-to-many); the inverse side is derived state kept
/// consistent by the synchronizer.
#[derive(Debug, Clone)]
pub struct RelationshipDescriptor {
    /// Relationship name on the declaring side.
    pub name: &'static str,
    /// Target entity type (or variant) name.
    pub target: &'static str,
    /// Cardinality seen from the declaring side.
    pub cardinality: Cardinality,
    /// Whether this side carries the foreign key / link table.
    pub owning: bool,
    /// Whether persist propagates to referenced entities.
    pub cascade: bool,
    /// Whether queries materialize the relationship eagerly.
    pub fetch: FetchMode,
    /// Name of the inverse relationship on the target type, if any.
    pub inverse: Option<&'static str>,
    /// Foreign key column, on owning to-one sides.
    pub fk_column: Option<&'static str>,
    /// Link table, on the owning many-to-many side.
    pub link: Option<LinkTable>,
}

impl RelationshipDescriptor {
    fn new(name: &'static str, target: &'static str, cardinality: Cardinality) -> Self {
        Self {
            name,
            target,
            cardinality,
            owning: false,
            cascade: false,
            fetch: FetchMode::Lazy,
            inverse: None,
            fk_column: None,
            link: None,
        }
    }

    /// Declares a one-to-one relationship.
    #[must_use]
    pub fn one_to_one(name: &'static str, target: &'static str) -> Self {
        Self::new(name, target, Cardinality::OneToOne)
    }

    /// Declares a many-to-one relationship.
    #[must_use]
    pub fn many_to_one(name: &'static str, target: &'static str) -> Self {
        Self::new(name, target, Cardinality::ManyToOne)
    }

    /// Declares a one-to-many relationship.
    #[must_use]
    pub fn one_to_many(name: &'static str, target: &'static str) -> Self {
        Self::new(name, target, Cardinality::OneToMany)
    }

    /// Declares a many-to-many relationship.
    #[must_use]
    pub fn many_to_many(name: &'static str, target: &'static str) -> Self {
        Self::new(name, target, Cardinality::ManyToMany)
    }

    /// Marks this side owning, with its foreign key column.
    #[must_use]
    pub fn owning_fk(mut self, fk_column: &'static str) -> Self {
        self.owning = true;
        self.fk_column = Some(fk_column);
        self
    }

    /// Marks this side owning, with its link table mapping.
    #[must_use]
    pub fn owning_link(
        mut self,
        table: &'static str,
        owner_column: &'static str,
        target_column: &'static str,
    ) -> Self {
        self.owning = true;
        self.link = Some(LinkTable {
            table,
            owner_column,
            target_column,
        });
        self
    }

    /// Names the inverse relationship on the target type.
    #[must_use]
    pub fn inverse_of(mut self, name: &'static str) -> Self {
        self.inverse = Some(name);
        self
    }

    /// Enables cascade-on-persist (composition).
    #[must_use]
    pub fn cascade(mut self) -> Self {
        self.cascade = true;
        self
    }

    /// Enables eager fetching.
    #[must_use]
    pub fn eager(mut self) -> Self {
        self.fetch = FetchMode::Eager;
        self
    }
}

/// A closed specialization of an entity type (a variant).
///
/// Variants share the base table and key; their extra fields live in
/// the same row, selected by the discriminator column.
#[derive(Debug, Clone)]
pub struct VariantDescriptor {
    /// Variant name.
    pub name: &'static str,
    /// Fields the variant adds to the base field set.
    pub fields: Vec<FieldDescriptor>,
}

impl VariantDescriptor {
    /// Creates a variant with no extra fields.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
        }
    }

    /// Adds a field to the variant.
    #[must_use]
    pub fn field(mut self, name: &'static str, column: &'static str, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor::new(name, column, kind));
        self
    }
}

/// Discriminator mapping for a polymorphic entity type.
#[derive(Debug, Clone)]
pub struct DiscriminatorSpec {
    /// Column holding the variant name (base rows store the base name).
    pub column: &'static str,
    /// The closed set of specializations.
    pub variants: Vec<VariantDescriptor>,
}

/// Static description of one entity type.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    /// Entity type name.
    pub name: &'static str,
    /// Backing table.
    pub table: &'static str,
    /// Primary key mapping.
    pub key: KeySpec,
    /// Scalar fields common to all variants.
    pub fields: Vec<FieldDescriptor>,
    /// Relationships declared on this type.
    pub relationships: Vec<RelationshipDescriptor>,
    /// Variant mapping, for polymorphic types.
    pub discriminator: Option<DiscriminatorSpec>,
}

impl EntityDescriptor {
    /// Creates a descriptor with a generated `id` key and no fields.
    #[must_use]
    pub fn new(name: &'static str, table: &'static str) -> Self {
        Self {
            name,
            table,
            key: KeySpec {
                name: "id",
                column: "id",
                policy: KeyPolicy::Generated,
            },
            fields: Vec::new(),
            relationships: Vec::new(),
            discriminator: None,
        }
    }

    /// Overrides the key mapping.
    #[must_use]
    pub fn key(mut self, name: &'static str, column: &'static str, policy: KeyPolicy) -> Self {
        self.key = KeySpec {
            name,
            column,
            policy,
        };
        self
    }

    /// Adds a scalar field.
    #[must_use]
    pub fn field(mut self, name: &'static str, column: &'static str, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor::new(name, column, kind));
        self
    }

    /// Adds a relationship.
    #[must_use]
    pub fn relationship(mut self, descriptor: RelationshipDescriptor) -> Self {
        self.relationships.push(descriptor);
        self
    }

    /// Declares the discriminator column and the closed variant set.
    #[must_use]
    pub fn discriminator(mut self, column: &'static str, variants: Vec<VariantDescriptor>) -> Self {
        self.discriminator = Some(DiscriminatorSpec { column, variants });
        self
    }

    /// Looks up a field by path.
    ///
    /// The key field resolves by its name. Variant fields resolve only
    /// when `variant` names the variant that declares them.
    #[must_use]
    pub fn field_for(&self, path: &str, variant: Option<&str>) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.name == path)
            .or_else(|| self.variant_field(path, variant))
    }

    fn variant_field(&self, path: &str, variant: Option<&str>) -> Option<&FieldDescriptor> {
        let spec = self.discriminator.as_ref()?;
        let variant = variant?;
        spec.variants
            .iter()
            .find(|v| v.name == variant)?
            .fields
            .iter()
            .find(|f| f.name == path)
    }

    /// Looks up a variant descriptor by name.
    #[must_use]
    pub fn variant(&self, name: &str) -> Option<&VariantDescriptor> {
        self.discriminator
            .as_ref()?
            .variants
            .iter()
            .find(|v| v.name == name)
    }

    /// Looks up a relationship by name.
    #[must_use]
    pub fn relationship_for(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Iterates the fields applicable to a record of `variant`.
    pub fn fields_for_variant<'a>(
        &'a self,
        variant: Option<&str>,
    ) -> impl Iterator<Item = &'a FieldDescriptor> {
        let extra = variant
            .and_then(|v| self.variant(v))
            .map(|v| v.fields.as_slice())
            .unwrap_or(&[]);
        self.fields.iter().chain(extra.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> EntityDescriptor {
        EntityDescriptor::new("person", "person")
            .field("first_name", "first_name", FieldKind::Text)
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
    }

    #[test]
    fn base_field_resolves_for_any_variant() {
        let desc = person();
        assert!(desc.field_for("first_name", None).is_some());
        assert!(desc.field_for("first_name", Some("geek")).is_some());
    }

    #[test]
    fn variant_field_needs_the_variant() {
        let desc = person();
        assert!(desc.field_for("favourite_language", None).is_none());
        assert_eq!(
            desc.field_for("favourite_language", Some("geek"))
                .map(|f| f.column),
            Some("favourite_language")
        );
    }

    #[test]
    fn relationship_lookup() {
        let desc = person();
        let rel = desc.relationship_for("id_card").unwrap();
        assert!(rel.owning && rel.cascade);
        assert_eq!(rel.fk_column, Some("id_card_id"));
        assert!(desc.relationship_for("missing").is_none());
    }

    #[test]
    fn kind_accepts_null_and_matching_values() {
        assert!(FieldKind::Text.accepts(&SqlValue::Null));
        assert!(FieldKind::Text.accepts(&SqlValue::Text("x".into())));
        assert!(!FieldKind::Text.accepts(&SqlValue::Integer(1)));
    }
}
