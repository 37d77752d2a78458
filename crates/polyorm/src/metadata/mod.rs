//! Entity metadata consumed by the compiler and the hydrator.
//!
//! Metadata is built programmatically with [`EntityMetadataBuilder`] and
//! registered in a [`MetadataRegistry`]; nothing here talks to a database.

mod builder;
mod registry;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

pub use builder::EntityMetadataBuilder;
pub use registry::MetadataRegistry;

/// Entities travel through the query layer as JSON object graphs.
pub type EntityObject = serde_json::Map<String, serde_json::Value>;

/// Logical column type, used for value coercion and change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    BigInt,
    Float,
    Decimal,
    Boolean,
    Text,
    Uuid,
    Timestamp,
    Date,
    Time,
    Json,
    Bytes,
    Enum,
    /// Array stored as comma separated text
    SimpleArray,
    /// Native array (Postgres, DuckDB, CockroachDB)
    Array,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::BigInt | Self::Float | Self::Decimal)
    }

    pub fn is_temporal(self) -> bool {
        matches!(self, Self::Timestamp | Self::Date | Self::Time)
    }
}

/// How a column value is produced when it is not supplied on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationStrategy {
    Increment,
    Uuid,
    Rowid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    /// Dotted path inside the entity object (`"profile.bio"` for embedded columns)
    pub property_path: String,
    pub database_name: String,
    pub column_type: ColumnType,
    pub is_primary: bool,
    pub is_nullable: bool,
    pub generation: Option<GenerationStrategy>,
    pub is_create_date: bool,
    pub is_update_date: bool,
    pub is_delete_date: bool,
    pub is_version: bool,
    pub is_discriminator: bool,
    /// Computed by a query, never persisted (relation ids, counts)
    pub is_virtual: bool,
    pub is_select: bool,
    pub is_insert: bool,
    pub is_update: bool,
    /// Database-side default expression, if any
    pub default: Option<String>,
    /// Owning relation property when this column is a join column
    pub relation: Option<String>,
    /// Property name on the referenced entity, for join columns
    pub referenced_property: Option<String>,
}

impl ColumnMetadata {
    pub fn new(property_path: impl Into<String>, column_type: ColumnType) -> Self {
        let property_path = property_path.into();
        Self {
            database_name: property_path.replace('.', "_"),
            property_path,
            column_type,
            is_primary: false,
            is_nullable: false,
            generation: None,
            is_create_date: false,
            is_update_date: false,
            is_delete_date: false,
            is_version: false,
            is_discriminator: false,
            is_virtual: false,
            is_select: true,
            is_insert: true,
            is_update: true,
            default: None,
            relation: None,
            referenced_property: None,
        }
    }

    /// Property used to read/write this column in an entity object.
    ///
    /// Join columns are stored under their relation property.
    pub fn entity_property(&self) -> &str {
        self.relation.as_deref().unwrap_or(&self.property_path)
    }

    /// Read this column's value out of an entity object.
    ///
    /// For join columns the relation may hold either the related object
    /// (`{"author": {"id": 3}}`) or the bare id (`{"author": 3}`).
    pub fn get_entity_value<'a>(&self, entity: &'a EntityObject) -> Option<&'a serde_json::Value> {
        if let Some(relation) = &self.relation {
            let value = entity.get(relation)?;
            return match value {
                serde_json::Value::Object(related) => {
                    let referenced = self.referenced_property.as_deref()?;
                    get_path(related, referenced)
                }
                serde_json::Value::Null => Some(value),
                other => Some(other),
            };
        }
        get_path(entity, &self.property_path)
    }

    /// Write a value at this column's property path, creating embedded objects as needed.
    pub fn set_entity_value(&self, entity: &mut EntityObject, value: serde_json::Value) {
        if let Some(relation) = &self.relation {
            let referenced = self.referenced_property.clone().unwrap_or_else(|| "id".into());
            match entity.get_mut(relation) {
                Some(serde_json::Value::Object(related)) => {
                    set_path(related, &referenced, value);
                }
                _ if value.is_null() => {
                    entity.insert(relation.clone(), serde_json::Value::Null);
                }
                _ => {
                    let mut related = EntityObject::new();
                    set_path(&mut related, &referenced, value);
                    entity.insert(relation.clone(), serde_json::Value::Object(related));
                }
            }
            return;
        }
        set_path(entity, &self.property_path, value);
    }
}

/// Read a dotted path out of a JSON object.
pub fn get_path<'a>(object: &'a EntityObject, path: &str) -> Option<&'a serde_json::Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = object.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Write a dotted path into a JSON object.
pub fn set_path(object: &mut EntityObject, path: &str, value: serde_json::Value) {
    match path.split_once('.') {
        None => {
            object.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = object
                .entry(head.to_string())
                .or_insert_with(|| serde_json::Value::Object(EntityObject::new()));
            if !entry.is_object() {
                *entry = serde_json::Value::Object(EntityObject::new());
            }
            if let serde_json::Value::Object(inner) = entry {
                set_path(inner, rest, value);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    ManyToOne,
    OneToOne,
    OneToMany,
    ManyToMany,
}

impl RelationKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::ManyToOne => "many-to-one",
            Self::OneToOne => "one-to-one",
            Self::OneToMany => "one-to-many",
            Self::ManyToMany => "many-to-many",
        }
    }

    /// Relations whose loaded value is an array
    pub fn is_collection(self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }
}

/// One column of a foreign key, from the owning table to the referenced table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinColumn {
    /// Column on the owning (or junction) table
    pub database_name: String,
    /// Column on the referenced table
    pub referenced_column: String,
}

/// The implicit table backing a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunctionTable {
    pub table_name: String,
    /// Junction columns pointing at the owning entity
    pub owner_columns: Vec<JoinColumn>,
    /// Junction columns pointing at the inverse entity
    pub inverse_columns: Vec<JoinColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationMetadata {
    pub property_path: String,
    pub kind: RelationKind,
    /// Target entity name
    pub target: String,
    /// Owner side holds the join columns (to-one) or defines the junction (many-to-many)
    pub is_owning: bool,
    /// Property on the target that points back here
    pub inverse_side: Option<String>,
    pub join_columns: Vec<JoinColumn>,
    pub junction: Option<JunctionTable>,
    pub is_nullable: bool,
}

impl RelationMetadata {
    pub fn is_to_one(&self) -> bool {
        matches!(self.kind, RelationKind::ManyToOne | RelationKind::OneToOne)
    }

    /// Many-to-one, or the one-to-one side that owns the foreign key
    pub fn is_to_one_owner(&self) -> bool {
        self.kind == RelationKind::ManyToOne || (self.kind == RelationKind::OneToOne && self.is_owning)
    }

    /// One-to-many, or the one-to-one side without the foreign key
    pub fn is_to_one_or_many_inverse(&self) -> bool {
        self.kind == RelationKind::OneToMany || (self.kind == RelationKind::OneToOne && !self.is_owning)
    }
}

/// Single-table inheritance settings of a child entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Inheritance {
    pub parent: String,
    pub discriminator_value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityMetadata {
    pub name: String,
    pub table_name: String,
    pub schema: Option<String>,
    pub columns: Vec<ColumnMetadata>,
    pub relations: Vec<RelationMetadata>,
    pub inheritance: Option<Inheritance>,
    /// Discriminator value of the root of a hierarchy
    pub discriminator_value: Option<String>,
    /// Child entity names, filled in by the registry
    pub children: Vec<String>,
}

impl EntityMetadata {
    /// `schema.table` or just `table`
    pub fn table_path(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.table_name),
            None => self.table_name.clone(),
        }
    }

    pub fn parent(&self) -> Option<&str> {
        self.inheritance.as_ref().map(|i| i.parent.as_str())
    }

    pub fn primary_columns(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter().filter(|c| c.is_primary)
    }

    pub fn has_multiple_primary_keys(&self) -> bool {
        self.primary_columns().count() > 1
    }

    pub fn version_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.is_version)
    }

    pub fn update_date_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.is_update_date)
    }

    pub fn create_date_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.is_create_date)
    }

    pub fn delete_date_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.is_delete_date)
    }

    pub fn discriminator_column(&self) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.is_discriminator)
    }

    /// Columns that are persisted on insert
    pub fn insertable_columns(&self) -> impl Iterator<Item = &ColumnMetadata> {
        self.columns.iter().filter(|c| !c.is_virtual && c.is_insert)
    }

    pub fn find_column_with_property_path(&self, path: &str) -> Option<&ColumnMetadata> {
        self.columns
            .iter()
            .find(|c| c.relation.is_none() && c.property_path == path)
    }

    pub fn find_column_with_database_name(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.database_name == name)
    }

    pub fn find_relation(&self, path: &str) -> Option<&RelationMetadata> {
        self.relations.iter().find(|r| r.property_path == path)
    }

    /// Resolve a property path to the column(s) it denotes.
    ///
    /// - a plain or embedded property yields its column
    /// - an owning to-one relation yields its join columns
    /// - `relation.referencedProperty` yields the matching join column
    /// - an embedded prefix (`"profile"`) yields every column under it
    pub fn find_columns_with_property_path(&self, path: &str) -> Vec<&ColumnMetadata> {
        if let Some(column) = self.find_column_with_property_path(path) {
            return vec![column];
        }

        let joined: Vec<&ColumnMetadata> = self
            .columns
            .iter()
            .filter(|c| c.relation.as_deref() == Some(path))
            .collect();
        if !joined.is_empty() {
            return joined;
        }

        if let Some((relation, referenced)) = path.split_once('.') {
            let found: Vec<&ColumnMetadata> = self
                .columns
                .iter()
                .filter(|c| {
                    c.relation.as_deref() == Some(relation)
                        && c.referenced_property.as_deref() == Some(referenced)
                })
                .collect();
            if !found.is_empty() {
                return found;
            }
        }

        let prefix = format!("{path}.");
        self.columns
            .iter()
            .filter(|c| c.relation.is_none() && c.property_path.starts_with(&prefix))
            .collect()
    }

    /// Primary key values of an entity, keyed by property path.
    ///
    /// Returns `None` unless every primary column has a non-null value.
    pub fn get_entity_id_map(&self, entity: &EntityObject) -> Option<EntityObject> {
        let mut ids = EntityObject::new();
        for column in self.primary_columns() {
            let value = column.get_entity_value(entity)?;
            if value.is_null() {
                return None;
            }
            ids.insert(column.property_path.clone(), value.clone());
        }
        if ids.is_empty() { None } else { Some(ids) }
    }

    /// Normalize an id given either as a bare value or as an id map.
    ///
    /// A bare value is accepted only for single-key entities.
    pub fn ensure_entity_id_map(&self, id: &serde_json::Value) -> Option<EntityObject> {
        match id {
            serde_json::Value::Object(map) => self.get_entity_id_map(map),
            serde_json::Value::Null => None,
            scalar => {
                let mut primaries = self.primary_columns();
                let column = primaries.next()?;
                if primaries.next().is_some() {
                    return None;
                }
                let mut ids = EntityObject::new();
                ids.insert(column.property_path.clone(), scalar.clone());
                Some(ids)
            }
        }
    }
}
