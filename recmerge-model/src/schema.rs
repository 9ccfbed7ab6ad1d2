use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes an entity type's storage layout and declared relationships.
///
/// The relation list replaces runtime discovery: each type states its
/// relationships up front, in the order they should be reassigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub entity_type: String,
    pub table: String,
    pub primary_key: String,
    /// Creation timestamp column, when the type keeps timestamps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Update timestamp column, when the type keeps timestamps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Soft-delete marker column. `None` means deletes remove the row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_delete_column: Option<String>,
    /// Attributes that are never copied from source to target.
    #[serde(default)]
    pub not_mergeable: Vec<String>,
    /// Relationships that are never reassigned or counted.
    #[serde(default)]
    pub protected_relations: Vec<String>,
    /// Attributes tried in order to build a human-readable label.
    #[serde(default)]
    pub label_attributes: Vec<String>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl EntitySchema {
    /// A schema with an `id` primary key, `created_at`/`updated_at`
    /// timestamps, no soft deletes and no relations.
    pub fn new(entity_type: &str, table: &str) -> Self {
        Self {
            entity_type: entity_type.into(),
            table: table.into(),
            primary_key: "id".into(),
            created_at: Some("created_at".into()),
            updated_at: Some("updated_at".into()),
            soft_delete_column: None,
            not_mergeable: Vec::new(),
            protected_relations: Vec::new(),
            label_attributes: vec!["name".into(), "label".into(), "title".into()],
            relations: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, column: &str) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.created_at = None;
        self.updated_at = None;
        self
    }

    /// Enables soft deletes on the conventional `deleted_at` column.
    pub fn soft_deletes(self) -> Self {
        self.with_soft_delete_column("deleted_at")
    }

    pub fn with_soft_delete_column(mut self, column: &str) -> Self {
        self.soft_delete_column = Some(column.into());
        self
    }

    pub fn not_mergeable<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.not_mergeable.extend(attributes.into_iter().map(Into::into));
        self
    }

    pub fn protect_relation(mut self, name: &str) -> Self {
        self.protected_relations.push(name.into());
        self
    }

    pub fn with_label_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// The discriminator value stored in polymorphic columns for this type.
    pub fn morph_class(&self) -> &str {
        &self.entity_type
    }

    pub fn supports_soft_deletes(&self) -> bool {
        self.soft_delete_column.is_some()
    }

    pub fn is_timestamp_column(&self, attribute: &str) -> bool {
        self.created_at.as_deref() == Some(attribute) || self.updated_at.as_deref() == Some(attribute)
    }

    pub fn is_soft_delete_column(&self, attribute: &str) -> bool {
        self.soft_delete_column.as_deref() == Some(attribute)
    }

    pub fn is_not_mergeable(&self, attribute: &str) -> bool {
        self.not_mergeable.iter().any(|a| a == attribute)
    }

    pub fn is_protected_relation(&self, name: &str) -> bool {
        self.protected_relations.iter().any(|r| r == name)
    }

    /// Looks up a declared relation by name.
    pub fn find_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// Structural category of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// This record holds a foreign key to its owner.
    BelongsTo,
    HasOne,
    HasMany,
    /// Polymorphic one-to-one: related row holds `{morph}_id` and `{morph}_type`.
    MorphOne,
    /// Polymorphic one-to-many.
    MorphMany,
    /// This record holds a polymorphic pointer to its owner.
    MorphTo,
    BelongsToMany,
    /// Polymorphic many-to-many, seen from the polymorphic side.
    MorphToMany,
    /// Polymorphic many-to-many, seen from the shared side.
    MorphedByMany,
    HasOneThrough,
    HasManyThrough,
}

impl RelationKind {
    pub const ALL: [RelationKind; 11] = [
        Self::BelongsTo,
        Self::HasOne,
        Self::HasMany,
        Self::MorphOne,
        Self::MorphMany,
        Self::MorphTo,
        Self::BelongsToMany,
        Self::MorphToMany,
        Self::MorphedByMany,
        Self::HasOneThrough,
        Self::HasManyThrough,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BelongsTo => "belongs_to",
            Self::HasOne => "has_one",
            Self::HasMany => "has_many",
            Self::MorphOne => "morph_one",
            Self::MorphMany => "morph_many",
            Self::MorphTo => "morph_to",
            Self::BelongsToMany => "belongs_to_many",
            Self::MorphToMany => "morph_to_many",
            Self::MorphedByMany => "morphed_by_many",
            Self::HasOneThrough => "has_one_through",
            Self::HasManyThrough => "has_many_through",
        }
    }

    /// True for the kinds whose rows live in a pivot table.
    pub fn is_many_to_many(self) -> bool {
        matches!(self, Self::BelongsToMany | Self::MorphToMany | Self::MorphedByMany)
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared relationship of an entity type.
///
/// One flat descriptor covers every kind; which columns are meaningful
/// depends on `kind`:
///
/// | kind | `table` | `foreign_key` | `related_key` |
/// |------|---------|---------------|---------------|
/// | has_one / has_many | related table | column on related rows | - |
/// | morph_one / morph_many | related table | `{morph}_id` on related rows | - |
/// | belongs_to | owner table | column on this record | - |
/// | morph_to | - | `{morph}_id` on this record | - |
/// | *_many (pivot) | pivot table | pivot column for this record | pivot column for the related row |
/// | *_through | far table | column on the intermediate table | column on far rows |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    pub kind: RelationKind,
    pub table: String,
    pub foreign_key: String,
    /// Column on this record (or on the owner, for `belongs_to`) that
    /// `foreign_key` references.
    pub local_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_key: Option<String>,
    /// Type discriminator column of polymorphic relations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub morph_type: Option<String>,
    /// Fixed discriminator value for `morphed_by_many`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub morph_class: Option<String>,
    /// Primary key of the related (or intermediate) rows.
    pub related_primary_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub through_table: Option<String>,
    /// Extra pivot columns carried over when re-attaching.
    #[serde(default)]
    pub pivot_columns: Vec<String>,
}

impl RelationDef {
    fn simple(name: &str, kind: RelationKind, table: &str, foreign_key: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            table: table.into(),
            foreign_key: foreign_key.into(),
            local_key: "id".into(),
            related_key: None,
            morph_type: None,
            morph_class: None,
            related_primary_key: "id".into(),
            through_table: None,
            pivot_columns: Vec::new(),
        }
    }

    fn morph(name: &str, kind: RelationKind, table: &str, morph_name: &str) -> Self {
        let mut def = Self::simple(name, kind, table, &format!("{morph_name}_id"));
        def.morph_type = Some(format!("{morph_name}_type"));
        def
    }

    /// Shorthand for an ownership pointer held on this record.
    pub fn belongs_to(name: &str, owner_table: &str, foreign_key: &str) -> Self {
        Self::simple(name, RelationKind::BelongsTo, owner_table, foreign_key)
    }

    pub fn has_one(name: &str, table: &str, foreign_key: &str) -> Self {
        Self::simple(name, RelationKind::HasOne, table, foreign_key)
    }

    pub fn has_many(name: &str, table: &str, foreign_key: &str) -> Self {
        Self::simple(name, RelationKind::HasMany, table, foreign_key)
    }

    pub fn morph_one(name: &str, table: &str, morph_name: &str) -> Self {
        Self::morph(name, RelationKind::MorphOne, table, morph_name)
    }

    pub fn morph_many(name: &str, table: &str, morph_name: &str) -> Self {
        Self::morph(name, RelationKind::MorphMany, table, morph_name)
    }

    /// Shorthand for a polymorphic ownership pointer held on this record.
    pub fn morph_to(name: &str, morph_name: &str) -> Self {
        Self::morph(name, RelationKind::MorphTo, "", morph_name)
    }

    pub fn belongs_to_many(
        name: &str,
        pivot_table: &str,
        foreign_pivot_key: &str,
        related_pivot_key: &str,
    ) -> Self {
        let mut def = Self::simple(name, RelationKind::BelongsToMany, pivot_table, foreign_pivot_key);
        def.related_key = Some(related_pivot_key.into());
        def
    }

    pub fn morph_to_many(
        name: &str,
        pivot_table: &str,
        morph_name: &str,
        related_pivot_key: &str,
    ) -> Self {
        let mut def = Self::morph(name, RelationKind::MorphToMany, pivot_table, morph_name);
        def.related_key = Some(related_pivot_key.into());
        def
    }

    /// The inverse of `morph_to_many`: this record is the shared side and
    /// `related_class` is the discriminator of the rows on the other side.
    pub fn morphed_by_many(
        name: &str,
        pivot_table: &str,
        foreign_pivot_key: &str,
        morph_name: &str,
        related_class: &str,
    ) -> Self {
        let mut def = Self::simple(name, RelationKind::MorphedByMany, pivot_table, foreign_pivot_key);
        def.related_key = Some(format!("{morph_name}_id"));
        def.morph_type = Some(format!("{morph_name}_type"));
        def.morph_class = Some(related_class.into());
        def
    }

    pub fn has_one_through(
        name: &str,
        far_table: &str,
        through_table: &str,
        first_key: &str,
        second_key: &str,
    ) -> Self {
        let mut def = Self::simple(name, RelationKind::HasOneThrough, far_table, first_key);
        def.through_table = Some(through_table.into());
        def.related_key = Some(second_key.into());
        def
    }

    pub fn has_many_through(
        name: &str,
        far_table: &str,
        through_table: &str,
        first_key: &str,
        second_key: &str,
    ) -> Self {
        let mut def = Self::simple(name, RelationKind::HasManyThrough, far_table, first_key);
        def.through_table = Some(through_table.into());
        def.related_key = Some(second_key.into());
        def
    }

    pub fn with_local_key(mut self, column: &str) -> Self {
        self.local_key = column.into();
        self
    }

    pub fn with_related_primary_key(mut self, column: &str) -> Self {
        self.related_primary_key = column.into();
        self
    }

    /// Declares extra pivot columns that travel with a re-attached row.
    pub fn with_pivot<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pivot_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Declares `created_at`/`updated_at` pivot columns.
    pub fn with_pivot_timestamps(self) -> Self {
        self.with_pivot(["created_at", "updated_at"])
    }
}

/// Capability trait for typed models that take part in merges.
///
/// A model declares its schema once; the registry then treats every record
/// of that entity type as mergeable.
pub trait Mergeable {
    fn schema() -> EntitySchema;

    fn entity_type() -> String {
        Self::schema().entity_type
    }
}

/// All entity types known to a store, keyed by entity type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, EntitySchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema, replacing any previous schema for the same type.
    pub fn register(&mut self, schema: EntitySchema) -> &mut Self {
        self.schemas.insert(schema.entity_type.clone(), schema);
        self
    }

    pub fn register_model<M: Mergeable>(&mut self) -> &mut Self {
        self.register(M::schema())
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntitySchema> {
        self.schemas.get(entity_type)
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.schemas.contains_key(entity_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntitySchema> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl FromIterator<EntitySchema> for SchemaRegistry {
    fn from_iter<T: IntoIterator<Item = EntitySchema>>(iter: T) -> Self {
        let mut registry = Self::new();
        for schema in iter {
            registry.register(schema);
        }
        registry
    }
}
