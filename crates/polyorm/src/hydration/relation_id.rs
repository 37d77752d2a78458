use std::collections::HashMap;

use super::{RelatedKeys, collect_parents, key_of, parent_key};
use crate::connection::DataSource;
use crate::error::OrmResult;
use crate::metadata::EntityObject;
use crate::query::expression_map::RelationIdAttribute;
use crate::query::ExpressionMap;
use crate::row::Row;
use crate::runner::QueryRunner;
use crate::value::Value;

/// Related ids of one `load_relation_id_and_map` request.
#[derive(Debug, Clone)]
pub struct RelationIdResult {
    pub attribute: RelationIdAttribute,
    /// Parent columns whose values key [`RelationIdResult::ids`]
    pub parent_columns: Vec<String>,
    /// Parent key -> related ids (bare values, or id maps for composite keys)
    pub ids: HashMap<String, Vec<serde_json::Value>>,
}

/// Loads the ids requested with `load_relation_id_and_map`.
pub struct RelationIdLoader<'a> {
    source: &'a DataSource,
    runner: &'a QueryRunner,
    map: &'a ExpressionMap,
}

impl<'a> RelationIdLoader<'a> {
    pub fn new(source: &'a DataSource, runner: &'a QueryRunner, map: &'a ExpressionMap) -> Self {
        Self { source, runner, map }
    }

    /// One result per attribute, read from `rows` or from one extra query each.
    pub async fn load(&self, rows: &[Row]) -> OrmResult<Vec<RelationIdResult>> {
        let mut results = Vec::with_capacity(self.map.relation_id_attributes.len());
        for attribute in &self.map.relation_id_attributes {
            results.push(self.load_one(attribute, rows).await?);
        }
        Ok(results)
    }

    async fn load_one(&self, attribute: &RelationIdAttribute, rows: &[Row]) -> OrmResult<RelationIdResult> {
        let dialect = self.map.dialect;
        let parent = self.map.aliases.get(&attribute.parent_alias)?.metadata()?.clone();
        let relation = &attribute.relation;

        let Some(related) = RelatedKeys::resolve(self.source.registry(), &parent, relation)? else {
            // Owning to-one side: the ids are the join column values already selected.
            let parent_columns: Vec<String> = relation.join_columns.iter().map(|jc| jc.database_name.clone()).collect();
            let mut ids = HashMap::new();
            for row in rows {
                let values: Vec<Option<&Value>> = parent_columns
                    .iter()
                    .map(|c| row.get(&dialect.build_column_alias(&attribute.parent_alias, c)))
                    .collect();
                let Some(key) = key_of(&values) else {
                    continue;
                };
                ids.entry(key).or_insert_with(|| {
                    let referenced: Vec<&str> = relation.join_columns.iter().map(|jc| jc.referenced_column.as_str()).collect();
                    vec![id_value(&referenced, &values)]
                });
            }
            return Ok(RelationIdResult {
                attribute: attribute.clone(),
                parent_columns,
                ids,
            });
        };

        let parent_columns = related.parent_key_columns();
        let parents = collect_parents(dialect, rows, &attribute.parent_alias, &parent_columns);
        let mut ids: HashMap<String, Vec<serde_json::Value>> = HashMap::new();
        if !parents.is_empty() {
            let mut qb = related.query(self.source, self.runner, &parents);
            let properties: Vec<&str> = related.id_columns.iter().map(|(_, p)| p.as_str()).collect();
            for (i, (column, _)) in related.id_columns.iter().enumerate() {
                qb.add_select_as(related.column_ref(dialect, column), format!("id_{i}"));
            }
            tracing::debug!(
                target: "polyorm.hydration",
                relation = %relation.property_path,
                parents = parents.len(),
                "loading relation ids"
            );
            let width = related.parent_columns.len();
            for row in qb.get_raw_many().await? {
                let Some(key) = parent_key(&row, width) else {
                    continue;
                };
                let names: Vec<String> = (0..properties.len()).map(|i| format!("id_{i}")).collect();
                let values: Vec<Option<&Value>> = names.iter().map(|n| row.get(n)).collect();
                ids.entry(key).or_default().push(id_value(&properties, &values));
            }
        }
        Ok(RelationIdResult {
            attribute: attribute.clone(),
            parent_columns,
            ids,
        })
    }
}

/// A bare value for single-column keys, an id map otherwise.
fn id_value(properties: &[&str], values: &[Option<&Value>]) -> serde_json::Value {
    let json = |v: &Option<&Value>| v.map(Value::to_json).unwrap_or(serde_json::Value::Null);
    if let ([_], [value]) = (properties, values) {
        return json(value);
    }
    let mut object = EntityObject::new();
    for (property, value) in properties.iter().zip(values) {
        object.insert(property.to_string(), json(value));
    }
    serde_json::Value::Object(object)
}
