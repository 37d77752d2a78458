use std::collections::HashMap;
use std::sync::Arc;

use super::{RelationCountResult, RelationIdResult, row_key};
use crate::error::OrmResult;
use crate::metadata::{EntityMetadata, EntityObject, MetadataRegistry, set_path};
use crate::query::{Alias, ExpressionMap};
use crate::row::Row;

/// Builds entity objects out of the raw rows of a SELECT.
pub struct RawSqlResultsToEntityTransformer<'a> {
    map: &'a ExpressionMap,
    registry: &'a MetadataRegistry,
    relation_ids: &'a [RelationIdResult],
    relation_counts: &'a [RelationCountResult],
}

impl<'a> RawSqlResultsToEntityTransformer<'a> {
    pub fn new(
        map: &'a ExpressionMap,
        registry: &'a MetadataRegistry,
        relation_ids: &'a [RelationIdResult],
        relation_counts: &'a [RelationCountResult],
    ) -> Self {
        Self {
            map,
            registry,
            relation_ids,
            relation_counts,
        }
    }

    /// Entities of `alias`, one per distinct primary key, in first-seen order.
    pub fn transform(&self, rows: &[Row], alias: &Alias) -> OrmResult<Vec<EntityObject>> {
        let rows: Vec<&Row> = rows.iter().collect();
        self.transform_rows(&rows, alias)
    }

    fn transform_rows(&self, rows: &[&Row], alias: &Alias) -> OrmResult<Vec<EntityObject>> {
        let metadata = alias.metadata()?;
        let mut entities = Vec::new();
        for group in self.group(rows, alias, metadata) {
            if let Some(entity) = self.transform_group(&group, alias, metadata)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    fn group<'r>(&self, rows: &[&'r Row], alias: &Alias, metadata: &EntityMetadata) -> Vec<Vec<&'r Row>> {
        let primaries: Vec<String> = metadata.primary_columns().map(|c| c.database_name.clone()).collect();
        if primaries.is_empty() {
            return rows.iter().map(|row| vec![*row]).collect();
        }

        let mut groups: Vec<Vec<&Row>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for &row in rows {
            // Rows of an unmatched LEFT JOIN carry NULL keys for this alias.
            let Some(key) = row_key(self.map.dialect, row, &alias.name, &primaries) else {
                continue;
            };
            match index.get(&key) {
                Some(&i) => groups[i].push(row),
                None => {
                    index.insert(key, groups.len());
                    groups.push(vec![row]);
                }
            }
        }
        groups
    }

    fn transform_group(&self, rows: &[&Row], alias: &Alias, metadata: &Arc<EntityMetadata>) -> OrmResult<Option<EntityObject>> {
        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let dialect = self.map.dialect;
        let metadata = self.resolve_subtype(first, alias, metadata);

        let mut entity = EntityObject::new();
        let mut has_data = false;
        for column in metadata.columns.iter().filter(|c| !c.is_virtual && c.relation.is_none()) {
            let key = dialect.build_column_alias(&alias.name, &column.database_name);
            if let Some(value) = first.get(&key) {
                has_data |= !value.is_null();
                set_path(&mut entity, &column.property_path, dialect.prepare_hydrated_value(column, value));
            }
        }

        for join in &self.map.joins {
            if join.parent_alias() != Some(alias.name.as_str()) || !(join.selected || join.map_to.is_some()) {
                continue;
            }
            let Some(join_alias) = self.map.aliases.find(&join.alias).filter(|a| a.has_metadata()) else {
                continue;
            };
            let (property, many) = match (&join.map_to, join.relation()) {
                (Some(mapping), _) => (mapping.property.clone(), mapping.many),
                (None, Some(relation)) => (relation.property_path.clone(), relation.kind.is_collection()),
                (None, None) => continue,
            };
            let children = self.transform_rows(rows, join_alias)?;
            has_data |= !children.is_empty();
            let value = if many {
                serde_json::Value::Array(children.into_iter().map(serde_json::Value::Object).collect())
            } else {
                children
                    .into_iter()
                    .next()
                    .map(serde_json::Value::Object)
                    .unwrap_or(serde_json::Value::Null)
            };
            set_path(&mut entity, &property, value);
        }

        for result in self.relation_ids.iter().filter(|r| r.attribute.parent_alias == alias.name) {
            let ids = row_key(dialect, first, &alias.name, &result.parent_columns).and_then(|key| result.ids.get(&key));
            let value = if result.attribute.relation.is_to_one() {
                ids.and_then(|ids| ids.first().cloned()).unwrap_or(serde_json::Value::Null)
            } else {
                serde_json::Value::Array(ids.cloned().unwrap_or_default())
            };
            set_path(&mut entity, &result.attribute.map_to, value);
        }

        for result in self.relation_counts.iter().filter(|r| r.attribute.parent_alias == alias.name) {
            let count = row_key(dialect, first, &alias.name, &result.parent_columns)
                .and_then(|key| result.counts.get(&key).copied())
                .unwrap_or(0);
            set_path(&mut entity, &result.attribute.map_to, serde_json::Value::from(count));
        }

        let has_keys = metadata.primary_columns().next().is_some();
        Ok((has_keys || has_data).then_some(entity))
    }

    /// The concrete entity of a single-table-inheritance row, by its discriminator value.
    fn resolve_subtype(&self, row: &Row, alias: &Alias, metadata: &Arc<EntityMetadata>) -> Arc<EntityMetadata> {
        let Some(column) = metadata.discriminator_column() else {
            return metadata.clone();
        };
        let key = self.map.dialect.build_column_alias(&alias.name, &column.database_name);
        let Some(value) = row.get(&key).and_then(|v| v.as_str()) else {
            return metadata.clone();
        };
        self.registry
            .descendants(&metadata.name)
            .into_iter()
            .find(|child| child.inheritance.as_ref().is_some_and(|i| i.discriminator_value == value))
            .unwrap_or_else(|| metadata.clone())
    }
}
