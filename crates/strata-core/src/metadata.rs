//! Entity metadata: the declared, authoritative shape of every entity.
//!
//! How declarations are collected is up to the caller; this module only
//! stores them. A [`MetadataStoreBuilder`] takes the declared entities,
//! fills in default names for join columns and junction tables, synthesizes
//! the junction and closure entities, and validates the result.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::naming;

/// Logical column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnType {
    /// Bounded string, see [`ColumnMetadata::length`].
    String,
    /// 64-bit integer.
    Int,
    /// Double precision float.
    Float,
    /// Exact decimal, see precision and scale.
    Decimal,
    /// Calendar date.
    Date,
    /// Date and time, optionally with zone.
    DateTime,
    /// Time of day.
    Time,
    /// Boolean.
    Boolean,
    /// JSON document.
    Json,
    /// Unbounded text.
    Text,
    /// Array of strings stored as comma-joined text.
    SimpleArray,
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum DefaultValue {
    /// No default value.
    #[default]
    None,
    /// NULL default.
    Null,
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Integer(i64),
    /// Float default.
    Float(f64),
    /// String default.
    String(String),
    /// SQL expression (e.g., "CURRENT_TIMESTAMP").
    Expression(String),
}

impl DefaultValue {
    /// Returns the SQL representation of this default value.
    #[must_use]
    pub fn to_sql(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Null => Some("NULL".to_string()),
            Self::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
            Self::Expression(expr) => Some(format!("({expr})")),
        }
    }

    /// Returns true when no default is declared.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Foreign key action (ON DELETE, ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ForeignKeyAction {
    /// No action (error if referenced row is deleted/updated).
    #[default]
    NoAction,
    /// Restrict (same as NoAction but checked immediately).
    Restrict,
    /// Cascade the delete/update to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }

    /// Parses the action names reported by catalog queries.
    #[must_use]
    pub fn from_sql(action: &str) -> Self {
        match action.trim().to_ascii_uppercase().as_str() {
            "RESTRICT" => Self::Restrict,
            "CASCADE" => Self::Cascade,
            "SET NULL" => Self::SetNull,
            "SET DEFAULT" => Self::SetDefault,
            _ => Self::NoAction,
        }
    }
}

/// A persisted property of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Property name on the entity.
    pub property: String,
    /// Column name in the table.
    pub name: String,
    /// Logical type.
    pub ty: ColumnType,
    /// Whether the column allows NULL values.
    #[serde(default)]
    pub nullable: bool,
    /// Maximum length for string columns.
    #[serde(default)]
    pub length: Option<u32>,
    /// Precision for decimal columns.
    #[serde(default)]
    pub precision: Option<u8>,
    /// Scale for decimal columns.
    #[serde(default)]
    pub scale: Option<u8>,
    /// Whether a datetime column carries a zone.
    #[serde(default)]
    pub timezone: bool,
    /// Whether the database assigns the value (auto-increment identifier).
    #[serde(default)]
    pub generated: bool,
    /// Whether this column is the primary column.
    #[serde(default)]
    pub primary: bool,
    /// Whether the column has a UNIQUE constraint.
    #[serde(default)]
    pub unique: bool,
    /// Default value.
    #[serde(default)]
    pub default: DefaultValue,
    /// Virtual columns are held on the entity but never written or diffed.
    #[serde(default)]
    pub is_virtual: bool,
}

impl ColumnMetadata {
    /// Creates a NOT NULL column whose name equals the property name.
    #[must_use]
    pub fn new(property: impl Into<String>, ty: ColumnType) -> Self {
        let property = property.into();
        Self {
            name: property.clone(),
            property,
            ty,
            nullable: false,
            length: None,
            precision: None,
            scale: None,
            timezone: false,
            generated: false,
            primary: false,
            unique: false,
            default: DefaultValue::None,
            is_virtual: false,
        }
    }

    /// Integer primary column assigned by the database.
    #[must_use]
    pub fn generated_id(property: impl Into<String>) -> Self {
        Self::new(property, ColumnType::Int).primary().generated()
    }

    /// Overrides the column name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the column as nullable.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the maximum length.
    #[must_use]
    pub const fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Sets decimal precision and scale.
    #[must_use]
    pub const fn precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// Marks a datetime column as zone-aware.
    #[must_use]
    pub const fn with_timezone(mut self) -> Self {
        self.timezone = true;
        self
    }

    /// Marks the column as the primary column.
    #[must_use]
    pub const fn primary(mut self) -> Self {
        self.primary = true;
        self.nullable = false;
        self
    }

    /// Marks the column as database-generated.
    #[must_use]
    pub const fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    /// Sets the column as unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = value;
        self
    }

    /// Marks the column as virtual.
    #[must_use]
    pub const fn virtual_column(mut self) -> Self {
        self.is_virtual = true;
        self
    }
}

/// Relation cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationKind {
    /// One-to-one.
    OneToOne,
    /// Many-to-one, always the owning side.
    ManyToOne,
    /// One-to-many, always the inverse side.
    OneToMany,
    /// Many-to-many through a junction table.
    ManyToMany,
}

impl RelationKind {
    /// Whether the related value is an array.
    #[must_use]
    pub const fn is_many(self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }
}

/// Cascade permissions of a relation, evaluated per operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Cascade {
    /// New related entities may be inserted.
    #[serde(default)]
    pub insert: bool,
    /// Changed related entities may be updated.
    #[serde(default)]
    pub update: bool,
    /// Related entities dropped from the relation may be removed.
    #[serde(default)]
    pub remove: bool,
}

impl Cascade {
    /// No cascades.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            insert: false,
            update: false,
            remove: false,
        }
    }

    /// Insert, update and remove cascades.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            insert: true,
            update: true,
            remove: true,
        }
    }

    /// Insert and update cascades.
    #[must_use]
    pub const fn insert_update() -> Self {
        Self {
            insert: true,
            update: true,
            remove: false,
        }
    }
}

/// Link table columns of a many-to-many relation, seen from the declaring side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JunctionMetadata {
    /// Junction table name.
    pub table: String,
    /// Column pointing at the declaring entity.
    pub owner_column: String,
    /// Column pointing at the related entity.
    pub inverse_column: String,
}

impl JunctionMetadata {
    /// The same junction seen from the other side.
    #[must_use]
    pub fn swapped(&self) -> Self {
        Self {
            table: self.table.clone(),
            owner_column: self.inverse_column.clone(),
            inverse_column: self.owner_column.clone(),
        }
    }
}

/// A relation property of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationMetadata {
    /// Property name on the entity.
    pub property: String,
    /// Cardinality.
    pub kind: RelationKind,
    /// Target of the related entity.
    pub target: String,
    /// Property on the related entity pointing back, if declared.
    #[serde(default)]
    pub inverse: Option<String>,
    /// Whether this side stores the foreign key (or owns the junction table).
    #[serde(default)]
    pub owning: bool,
    /// Cascade permissions.
    #[serde(default)]
    pub cascade: Cascade,
    /// Join column for owning many-to-one and one-to-one relations.
    #[serde(default)]
    pub join_column: Option<String>,
    /// Whether the join column accepts NULL.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// ON DELETE action of the join column.
    #[serde(default)]
    pub on_delete: ForeignKeyAction,
    /// Junction table for many-to-many relations.
    #[serde(default)]
    pub junction: Option<JunctionMetadata>,
}

const fn default_true() -> bool {
    true
}

impl RelationMetadata {
    fn new(property: impl Into<String>, kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            kind,
            target: target.into(),
            inverse: None,
            owning: false,
            cascade: Cascade::none(),
            join_column: None,
            nullable: true,
            on_delete: ForeignKeyAction::NoAction,
            junction: None,
        }
    }

    /// Owning many-to-one relation.
    #[must_use]
    pub fn many_to_one(property: impl Into<String>, target: impl Into<String>) -> Self {
        let mut relation = Self::new(property, RelationKind::ManyToOne, target);
        relation.owning = true;
        relation
    }

    /// Inverse one-to-many relation; `inverse` names the many-to-one on the target.
    #[must_use]
    pub fn one_to_many(
        property: impl Into<String>,
        target: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        let mut relation = Self::new(property, RelationKind::OneToMany, target);
        relation.inverse = Some(inverse.into());
        relation
    }

    /// One-to-one relation. Call [`Self::owner`] on the side holding the key.
    #[must_use]
    pub fn one_to_one(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(property, RelationKind::OneToOne, target)
    }

    /// Many-to-many relation. Call [`Self::owner`] on the side owning the junction.
    #[must_use]
    pub fn many_to_many(property: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(property, RelationKind::ManyToMany, target)
    }

    /// Marks this side as owning.
    #[must_use]
    pub const fn owner(mut self) -> Self {
        self.owning = true;
        self
    }

    /// Sets the inverse property.
    #[must_use]
    pub fn inverse(mut self, property: impl Into<String>) -> Self {
        self.inverse = Some(property.into());
        self
    }

    /// Sets the cascade permissions.
    #[must_use]
    pub const fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    /// Overrides the join column name.
    #[must_use]
    pub fn join_column(mut self, name: impl Into<String>) -> Self {
        self.join_column = Some(name.into());
        self
    }

    /// Makes the join column NOT NULL.
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the ON DELETE action.
    #[must_use]
    pub const fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Whether this relation stores a join column on the declaring table.
    #[must_use]
    pub const fn has_join_column(&self) -> bool {
        self.owning && matches!(self.kind, RelationKind::ManyToOne | RelationKind::OneToOne)
    }
}

/// A declared index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Index name; defaulted from the table and columns.
    #[serde(default)]
    pub name: Option<String>,
    /// Indexed column names.
    pub columns: Vec<String>,
    /// Whether the index is unique.
    #[serde(default)]
    pub unique: bool,
}

/// A declared multi-column unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueMetadata {
    /// Constraint name; defaulted from the table and columns.
    #[serde(default)]
    pub name: Option<String>,
    /// Column names.
    pub columns: Vec<String>,
}

/// Closure-table tree settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeMetadata {
    /// Self-referencing many-to-one relation naming the parent.
    pub parent: String,
    /// Closure table name; defaulted from the entity table.
    #[serde(default)]
    pub closure_table: Option<String>,
    /// Column property caching the node depth, if any.
    #[serde(default)]
    pub level_column: Option<String>,
}

/// What kind of table an entity maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    /// A user-declared entity.
    #[default]
    Regular,
    /// Link table synthesized for a many-to-many relation.
    Junction,
    /// Closure table synthesized for a tree entity.
    Closure,
}

/// The declared shape of an entity and its relation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Target identity. Two instances are the same row only if their targets match.
    pub target: String,
    /// Table name.
    pub table: String,
    /// Columns in declaration order.
    #[serde(default)]
    pub columns: Vec<ColumnMetadata>,
    /// Relations in declaration order.
    #[serde(default)]
    pub relations: Vec<RelationMetadata>,
    /// Indexes.
    #[serde(default)]
    pub indices: Vec<IndexMetadata>,
    /// Multi-column unique constraints.
    #[serde(default)]
    pub uniques: Vec<UniqueMetadata>,
    /// Closure-table tree settings.
    #[serde(default)]
    pub tree: Option<TreeMetadata>,
    /// Entity kind.
    #[serde(default)]
    pub kind: EntityKind,
}

impl EntityMetadata {
    /// Creates metadata for a regular entity.
    #[must_use]
    pub fn new(target: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            table: table.into(),
            columns: Vec::new(),
            relations: Vec::new(),
            indices: Vec::new(),
            uniques: Vec::new(),
            tree: None,
            kind: EntityKind::Regular,
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: ColumnMetadata) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds a relation.
    #[must_use]
    pub fn relation(mut self, relation: RelationMetadata) -> Self {
        self.relations.push(relation);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, columns: &[&str], unique: bool) -> Self {
        self.indices.push(IndexMetadata {
            name: None,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            unique,
        });
        self
    }

    /// Adds a unique constraint.
    #[must_use]
    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.uniques.push(UniqueMetadata {
            name: None,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        });
        self
    }

    /// Makes this a closure-table tree whose parent is the given relation.
    #[must_use]
    pub fn closure_tree(mut self, parent: impl Into<String>, level_column: Option<&str>) -> Self {
        self.tree = Some(TreeMetadata {
            parent: parent.into(),
            closure_table: None,
            level_column: level_column.map(str::to_string),
        });
        self
    }

    /// The primary column of a regular entity.
    #[must_use]
    pub fn primary_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.primary)
    }

    /// Position of the primary column.
    #[must_use]
    pub fn primary_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.primary)
    }

    /// Looks up a column by property name.
    #[must_use]
    pub fn column_by_property(&self, property: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.property == property)
    }

    /// Position of a column by property name.
    #[must_use]
    pub fn column_index(&self, property: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.property == property)
    }

    /// Looks up a relation by property name.
    #[must_use]
    pub fn relation_by_property(&self, property: &str) -> Option<&RelationMetadata> {
        self.relations.iter().find(|r| r.property == property)
    }

    /// Position of a relation by property name.
    #[must_use]
    pub fn relation_index(&self, property: &str) -> Option<usize> {
        self.relations.iter().position(|r| r.property == property)
    }

    /// Columns that are written and compared.
    pub fn persisted_columns(&self) -> impl Iterator<Item = (usize, &ColumnMetadata)> {
        self.columns.iter().enumerate().filter(|(_, c)| !c.is_virtual)
    }

    /// Relations storing a join column on this table.
    pub fn join_relations(&self) -> impl Iterator<Item = (usize, &RelationMetadata)> {
        self.relations
            .iter()
            .enumerate()
            .filter(|(_, r)| r.has_join_column())
    }

    /// Checks the primary column invariant.
    pub fn validate(&self) -> Result<()> {
        if self.kind == EntityKind::Regular {
            let found = self.columns.iter().filter(|c| c.primary).count();
            if found != 1 {
                return Err(CoreError::PrimaryColumnCount {
                    target: self.target.clone(),
                    found,
                });
            }
        }
        Ok(())
    }
}

/// Collects declared entities before they are validated.
#[derive(Debug, Default)]
pub struct MetadataStoreBuilder {
    entities: Vec<EntityMetadata>,
}

impl MetadataStoreBuilder {
    /// Registers an entity.
    #[must_use]
    pub fn entity(mut self, metadata: EntityMetadata) -> Self {
        self.entities.push(metadata);
        self
    }

    /// Registers every entity of a list, e.g. one read from a JSON file.
    #[must_use]
    pub fn entities(mut self, metadata: impl IntoIterator<Item = EntityMetadata>) -> Self {
        self.entities.extend(metadata);
        self
    }

    /// Validates the declarations, fills default names and synthesizes
    /// junction and closure entities.
    pub fn build(self) -> Result<MetadataStore> {
        let mut entities = self.entities;
        for entity in &entities {
            entity.validate()?;
            if entities.iter().filter(|e| e.target == entity.target).count() > 1 {
                return Err(CoreError::InvalidMetadata(format!(
                    "entity '{}' registered twice",
                    entity.target
                )));
            }
        }

        let declared = entities.clone();
        let mut synthesized = Vec::new();
        for entity in &mut entities {
            let owner = find(&declared, &entity.target)?;
            for relation in &mut entity.relations {
                let related = find(&declared, &relation.target)?;
                if relation.has_join_column() && relation.join_column.is_none() {
                    let referenced = primary_of(related)?;
                    relation.join_column =
                        Some(naming::join_column(&relation.property, &referenced.name));
                }
                if relation.kind == RelationKind::ManyToMany
                    && relation.owning
                    && relation.junction.is_none()
                {
                    relation.junction = Some(owning_junction(owner, relation, related));
                }
            }
        }

        // Inverse many-to-many sides reuse the owning side's junction, swapped.
        let owning_view = entities.clone();
        for entity in &mut entities {
            let target = entity.target.clone();
            for relation in &mut entity.relations {
                if relation.kind != RelationKind::ManyToMany || relation.owning {
                    continue;
                }
                let counterpart = owning_view
                    .iter()
                    .find(|e| e.target == relation.target)
                    .and_then(|e| {
                        e.relations.iter().find(|r| {
                            r.kind == RelationKind::ManyToMany
                                && r.owning
                                && r.target == target
                                && (relation.inverse.as_deref() == Some(r.property.as_str())
                                    || r.inverse.as_deref() == Some(relation.property.as_str()))
                        })
                    })
                    .ok_or_else(|| {
                        CoreError::InvalidMetadata(format!(
                            "many-to-many '{}.{}' has no owning side",
                            target, relation.property
                        ))
                    })?;
                relation.junction = counterpart.junction.as_ref().map(JunctionMetadata::swapped);
            }
        }

        for entity in &mut entities {
            let table = entity.table.clone();
            for index in &mut entity.indices {
                if index.name.is_none() {
                    index.name = Some(naming::index(&table, &index.columns));
                }
            }
            for unique in &mut entity.uniques {
                if unique.name.is_none() {
                    unique.name = Some(naming::unique(&table, &unique.columns));
                }
            }

            for relation in &entity.relations {
                if let (RelationKind::ManyToMany, true, Some(junction)) =
                    (relation.kind, relation.owning, &relation.junction)
                {
                    let related = find(&declared, &relation.target)?;
                    synthesized.push(junction_entity(entity, related, junction)?);
                }
            }

            if let Some(tree) = entity.tree.clone() {
                let parent = entity.relation_by_property(&tree.parent).ok_or_else(|| {
                    CoreError::UnknownRelation {
                        entity: entity.target.clone(),
                        relation: tree.parent.clone(),
                    }
                })?;
                if parent.kind != RelationKind::ManyToOne || parent.target != entity.target {
                    return Err(CoreError::InvalidMetadata(format!(
                        "tree parent '{}.{}' must be a many-to-one to itself",
                        entity.target, tree.parent
                    )));
                }
                if let Some(level) = &tree.level_column {
                    if entity.column_by_property(level).is_none() {
                        return Err(CoreError::UnknownColumn {
                            entity: entity.target.clone(),
                            column: level.clone(),
                        });
                    }
                }
                let closure_table = tree
                    .closure_table
                    .clone()
                    .unwrap_or_else(|| naming::closure_table(&entity.table));
                entity.tree = Some(TreeMetadata {
                    closure_table: Some(closure_table),
                    ..tree
                });
                synthesized.push(closure_entity(entity)?);
            }
        }

        entities.extend(synthesized);
        let entities: Vec<Arc<EntityMetadata>> = entities.into_iter().map(Arc::new).collect();
        let index = entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.target.clone(), i))
            .collect();
        Ok(MetadataStore { entities, index })
    }
}

fn find<'a>(declared: &'a [EntityMetadata], target: &str) -> Result<&'a EntityMetadata> {
    declared
        .iter()
        .find(|e| e.target == target)
        .ok_or_else(|| CoreError::MetadataNotRegistered(target.to_string()))
}

fn owning_junction(
    owner: &EntityMetadata,
    relation: &RelationMetadata,
    related: &EntityMetadata,
) -> JunctionMetadata {
    let owner_column = naming::junction_column(&owner.table, related_pk_name(owner));
    let mut inverse_column = naming::junction_column(&related.table, related_pk_name(related));
    if inverse_column == owner_column {
        inverse_column.push_str("_inverse");
    }
    JunctionMetadata {
        table: naming::junction_table(&owner.table, &relation.property, &related.table),
        owner_column,
        inverse_column,
    }
}

fn related_pk_name(entity: &EntityMetadata) -> &str {
    entity.primary_column().map_or("id", |c| c.name.as_str())
}

fn key_column(name: &str, referenced: &ColumnMetadata) -> ColumnMetadata {
    let mut column = ColumnMetadata::new(name, referenced.ty).primary();
    column.length = referenced.length;
    column
}

fn junction_entity(
    owner: &EntityMetadata,
    related: &EntityMetadata,
    junction: &JunctionMetadata,
) -> Result<EntityMetadata> {
    let owner_pk = primary_of(owner)?;
    let related_pk = primary_of(related)?;
    Ok(EntityMetadata {
        target: junction.table.clone(),
        table: junction.table.clone(),
        columns: vec![
            key_column(&junction.owner_column, owner_pk),
            key_column(&junction.inverse_column, related_pk),
        ],
        relations: vec![
            RelationMetadata::many_to_one(junction.owner_column.clone(), owner.target.clone())
                .join_column(junction.owner_column.clone())
                .not_null()
                .on_delete(ForeignKeyAction::Cascade),
            RelationMetadata::many_to_one(junction.inverse_column.clone(), related.target.clone())
                .join_column(junction.inverse_column.clone())
                .not_null()
                .on_delete(ForeignKeyAction::Cascade),
        ],
        indices: Vec::new(),
        uniques: Vec::new(),
        tree: None,
        kind: EntityKind::Junction,
    })
}

fn closure_entity(entity: &EntityMetadata) -> Result<EntityMetadata> {
    let pk = primary_of(entity)?;
    let table = entity
        .tree
        .as_ref()
        .and_then(|t| t.closure_table.clone())
        .unwrap_or_else(|| naming::closure_table(&entity.table));
    Ok(EntityMetadata {
        target: table.clone(),
        table,
        columns: vec![
            key_column(naming::CLOSURE_ANCESTOR, pk),
            key_column(naming::CLOSURE_DESCENDANT, pk),
            ColumnMetadata::new(naming::CLOSURE_LEVEL, ColumnType::Int)
                .default(DefaultValue::Integer(1)),
        ],
        relations: vec![
            RelationMetadata::many_to_one(naming::CLOSURE_ANCESTOR, entity.target.clone())
                .join_column(naming::CLOSURE_ANCESTOR)
                .not_null()
                .on_delete(ForeignKeyAction::Cascade),
            RelationMetadata::many_to_one(naming::CLOSURE_DESCENDANT, entity.target.clone())
                .join_column(naming::CLOSURE_DESCENDANT)
                .not_null()
                .on_delete(ForeignKeyAction::Cascade),
        ],
        indices: Vec::new(),
        uniques: Vec::new(),
        tree: None,
        kind: EntityKind::Closure,
    })
}

fn primary_of(entity: &EntityMetadata) -> Result<&ColumnMetadata> {
    entity
        .primary_column()
        .ok_or_else(|| CoreError::PrimaryColumnCount {
            target: entity.target.clone(),
            found: 0,
        })
}

/// Registry of validated entity metadata, keyed by target.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    entities: Vec<Arc<EntityMetadata>>,
    index: HashMap<String, usize>,
}

impl MetadataStore {
    /// Starts collecting declarations.
    #[must_use]
    pub fn builder() -> MetadataStoreBuilder {
        MetadataStoreBuilder::default()
    }

    /// Returns the metadata registered for `target`.
    pub fn get(&self, target: &str) -> Result<&Arc<EntityMetadata>> {
        self.index
            .get(target)
            .map(|&i| &self.entities[i])
            .ok_or_else(|| CoreError::MetadataNotRegistered(target.to_string()))
    }

    /// Returns the metadata of the entity a relation points at.
    pub fn related(&self, relation: &RelationMetadata) -> Result<&Arc<EntityMetadata>> {
        self.get(&relation.target)
    }

    /// Whether `target` is registered.
    #[must_use]
    pub fn contains(&self, target: &str) -> bool {
        self.index.contains_key(target)
    }

    /// All entities, declared ones first, then synthesized junction and closure entities.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityMetadata>> {
        self.entities.iter()
    }
}
