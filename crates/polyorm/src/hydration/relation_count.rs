use std::collections::HashMap;

use super::{RelatedKeys, collect_parents, parent_key};
use crate::connection::DataSource;
use crate::error::{OrmError, OrmResult};
use crate::query::expression_map::RelationCountAttribute;
use crate::query::ExpressionMap;
use crate::row::Row;
use crate::runner::QueryRunner;

/// Related record counts of one `load_relation_count_and_map` request.
#[derive(Debug, Clone)]
pub struct RelationCountResult {
    pub attribute: RelationCountAttribute,
    /// Parent columns whose values key [`RelationCountResult::counts`]
    pub parent_columns: Vec<String>,
    pub counts: HashMap<String, i64>,
}

/// Loads the counts requested with `load_relation_count_and_map`, one grouped query per request.
pub struct RelationCountLoader<'a> {
    source: &'a DataSource,
    runner: &'a QueryRunner,
    map: &'a ExpressionMap,
}

impl<'a> RelationCountLoader<'a> {
    pub fn new(source: &'a DataSource, runner: &'a QueryRunner, map: &'a ExpressionMap) -> Self {
        Self { source, runner, map }
    }

    pub async fn load(&self, rows: &[Row]) -> OrmResult<Vec<RelationCountResult>> {
        let mut results = Vec::with_capacity(self.map.relation_count_attributes.len());
        for attribute in &self.map.relation_count_attributes {
            results.push(self.load_one(attribute, rows).await?);
        }
        Ok(results)
    }

    async fn load_one(&self, attribute: &RelationCountAttribute, rows: &[Row]) -> OrmResult<RelationCountResult> {
        let dialect = self.map.dialect;
        let parent = self.map.aliases.get(&attribute.parent_alias)?.metadata()?.clone();
        let relation = &attribute.relation;
        let related = RelatedKeys::resolve(self.source.registry(), &parent, relation)?.ok_or_else(|| {
            OrmError::usage(format!(
                "relation count needs a collection or inverse relation, {}.{} owns its key",
                parent.name, relation.property_path
            ))
        })?;

        let parent_columns = related.parent_key_columns();
        let parents = collect_parents(dialect, rows, &attribute.parent_alias, &parent_columns);
        let mut counts = HashMap::new();
        if !parents.is_empty() {
            let mut qb = related.query(self.source, self.runner, &parents);
            qb.add_select_as("COUNT(*)", "cnt");
            for (column, _) in &related.parent_columns {
                qb.add_group_by(related.column_ref(dialect, column));
            }
            let width = related.parent_columns.len();
            for row in qb.get_raw_many().await? {
                let Some(key) = parent_key(&row, width) else {
                    continue;
                };
                let count = row.get("cnt").and_then(|v| v.as_i64()).unwrap_or(0);
                counts.insert(key, count);
            }
        }
        Ok(RelationCountResult {
            attribute: attribute.clone(),
            parent_columns,
            counts,
        })
    }
}
