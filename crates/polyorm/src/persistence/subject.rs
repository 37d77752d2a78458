//! Pending entity writes and their change maps.

use std::sync::Arc;

use serde_json::Value as Json;

use crate::dialect::parse_timestamp;
use crate::metadata::{ColumnMetadata, ColumnType, EntityMetadata, EntityObject, RelationMetadata, set_path};

/// What a subject will do to its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectAction {
    Insert,
    Update,
    Remove,
    SoftRemove,
    Recover,
}

/// The property a change entry writes.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeTarget {
    Column(ColumnMetadata),
    Relation(RelationMetadata),
}

impl ChangeTarget {
    pub fn property_path(&self) -> &str {
        match self {
            Self::Column(column) => &column.property_path,
            Self::Relation(relation) => &relation.property_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEntry {
    pub target: ChangeTarget,
    pub value: Json,
}

/// One entity's pending insert, update or remove.
#[derive(Debug, Clone)]
pub struct Subject {
    pub metadata: Arc<EntityMetadata>,
    pub action: SubjectAction,
    pub entity: EntityObject,
    /// The row as last loaded from the database
    pub database_entity: Option<EntityObject>,
    pub changes: Vec<ChangeEntry>,
}

impl Subject {
    pub fn new(metadata: Arc<EntityMetadata>, action: SubjectAction, entity: EntityObject) -> Self {
        Self {
            metadata,
            action,
            entity,
            database_entity: None,
            changes: Vec::new(),
        }
    }

    pub fn with_database_entity(mut self, database_entity: EntityObject) -> Self {
        self.database_entity = Some(database_entity);
        self
    }

    /// Primary key map of the entity, falling back to the loaded row.
    pub fn identifier(&self) -> Option<EntityObject> {
        self.metadata
            .get_entity_id_map(&self.entity)
            .or_else(|| self.database_entity.as_ref().and_then(|db| self.metadata.get_entity_id_map(db)))
    }

    /// Recompute the change map against the loaded row.
    pub fn recompute(&mut self) -> &[ChangeEntry] {
        self.changes = compute_diff(&self.metadata, &self.entity, self.database_entity.as_ref());
        &self.changes
    }

    pub fn must_be_updated(&self) -> bool {
        !self.changes.is_empty()
    }

    /// The change map as an object suitable for [`UpdateQueryBuilder::set`](crate::query::UpdateQueryBuilder::set).
    pub fn changed_values(&self) -> EntityObject {
        let mut values = EntityObject::new();
        for change in &self.changes {
            match &change.target {
                ChangeTarget::Column(column) => set_path(&mut values, &column.property_path, change.value.clone()),
                ChangeTarget::Relation(relation) => {
                    values.insert(relation.property_path.clone(), change.value.clone());
                }
            }
        }
        values
    }
}

/// Columns and owned to-one relations whose value differs from the loaded row.
///
/// Without a loaded row every present value counts as a change. Properties
/// missing from `entity` are left alone; generated, virtual and non-updatable
/// columns never produce entries.
pub fn compute_diff(metadata: &EntityMetadata, entity: &EntityObject, database: Option<&EntityObject>) -> Vec<ChangeEntry> {
    let mut changes = Vec::new();

    for column in &metadata.columns {
        if column.relation.is_some()
            || column.is_virtual
            || !column.is_update
            || column.is_version
            || column.is_create_date
            || column.is_update_date
            || column.is_delete_date
            || column.is_discriminator
        {
            continue;
        }
        let Some(value) = column.get_entity_value(entity) else {
            continue;
        };
        let loaded = database.and_then(|db| column.get_entity_value(db));
        if loaded.is_some_and(|loaded| values_equal(column.column_type, value, loaded)) {
            continue;
        }
        changes.push(ChangeEntry {
            target: ChangeTarget::Column(column.clone()),
            value: value.clone(),
        });
    }

    for relation in metadata.relations.iter().filter(|r| r.is_to_one_owner()) {
        let Some(value) = entity.get(&relation.property_path) else {
            continue;
        };
        let join_columns: Vec<&ColumnMetadata> = metadata
            .columns
            .iter()
            .filter(|c| c.relation.as_deref() == Some(relation.property_path.as_str()))
            .collect();
        let unchanged = database.is_some_and(|db| {
            join_columns.iter().all(|column| {
                match (column.get_entity_value(entity), column.get_entity_value(db)) {
                    (Some(a), Some(b)) => values_equal(column.column_type, a, b),
                    (None, None) => true,
                    _ => false,
                }
            })
        });
        if unchanged {
            continue;
        }
        changes.push(ChangeEntry {
            target: ChangeTarget::Relation(relation.clone()),
            value: value.clone(),
        });
    }

    changes
}

/// Type-aware equality of two property values.
pub fn values_equal(column_type: ColumnType, a: &Json, b: &Json) -> bool {
    if a.is_null() || b.is_null() {
        return a.is_null() && b.is_null();
    }
    match column_type {
        ColumnType::Timestamp => match (as_instant(a), as_instant(b)) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        ColumnType::Date => date_text(a) == date_text(b),
        ColumnType::Json => json_equal(a, b),
        ColumnType::SimpleArray => simple_array_text(a) == simple_array_text(b),
        ColumnType::Bytes => as_bytes(a) == as_bytes(b),
        ColumnType::Enum => scalar_text(a) == scalar_text(b),
        ColumnType::Integer | ColumnType::BigInt | ColumnType::Float | ColumnType::Decimal => {
            match (as_number(a), as_number(b)) {
                (Some(a), Some(b)) => a == b,
                _ => a == b,
            }
        }
        _ => a == b,
    }
}

fn as_instant(value: &Json) -> Option<chrono::DateTime<chrono::Utc>> {
    match value {
        Json::String(s) => parse_timestamp(s),
        Json::Number(n) => n.as_i64().and_then(chrono::DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn date_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.get(..10).unwrap_or(s).to_string(),
        other => other.to_string(),
    }
}

/// Deep equality where object key order is irrelevant and JSON text equals its parsed form.
fn json_equal(a: &Json, b: &Json) -> bool {
    let parsed = |value: &Json| match value {
        Json::String(s) => serde_json::from_str::<Json>(s).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    };
    parsed(a) == parsed(b)
}

fn simple_array_text(value: &Json) -> String {
    match value {
        Json::Array(items) => items.iter().map(scalar_text).collect::<Vec<_>>().join(","),
        other => scalar_text(other),
    }
}

fn as_bytes(value: &Json) -> Vec<u8> {
    match value {
        Json::Array(items) => items
            .iter()
            .filter_map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect(),
        Json::String(s) => s.as_bytes().to_vec(),
        other => other.to_string().into_bytes(),
    }
}

fn as_number(value: &Json) -> Option<f64> {
    match value {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn scalar_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}
