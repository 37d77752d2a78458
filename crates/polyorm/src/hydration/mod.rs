//! Turning flat result rows into nested entity objects.
//!
//! A SELECT with joins returns one row per combination of joined records.
//! [`RawSqlResultsToEntityTransformer`] groups those rows back into entities
//! by primary key and nests joined aliases under their relation properties.
//! Relation ids and counts requested with `load_relation_id_and_map` /
//! `load_relation_count_and_map` are fetched by the loaders in this module
//! before transformation and merged in by the transformer.

mod relation_count;
mod relation_id;
mod transformer;

#[cfg(test)]
mod tests;

pub use relation_count::{RelationCountLoader, RelationCountResult};
pub use relation_id::{RelationIdLoader, RelationIdResult};
pub use transformer::RawSqlResultsToEntityTransformer;

use std::collections::HashSet;

use crate::connection::DataSource;
use crate::dialect::Dialect;
use crate::error::OrmResult;
use crate::metadata::{EntityMetadata, MetadataRegistry, RelationKind, RelationMetadata};
use crate::query::{QueryBuilder, RawCondition, SelectQueryBuilder, WhereExpressionBuilder};
use crate::row::Row;
use crate::runner::QueryRunner;
use crate::value::Value;

/// Lookup key of a row for the given columns of `alias`: their values' text, `|`-joined.
///
/// Returns `None` when every value is missing or NULL.
pub(crate) fn row_key(dialect: Dialect, row: &Row, alias: &str, columns: &[String]) -> Option<String> {
    let values: Vec<Option<&Value>> = columns
        .iter()
        .map(|column| row.get(&dialect.build_column_alias(alias, column)))
        .collect();
    key_of(&values)
}

/// Key part standing for a missing or NULL value. No column text can contain it.
const NULL_KEY_PART: &str = "\u{0}";

/// `|`-joined key text of some values, `None` when all are missing or NULL.
pub(crate) fn key_of(values: &[Option<&Value>]) -> Option<String> {
    if values.iter().all(|v| v.is_none_or(Value::is_null)) {
        return None;
    }
    Some(
        values
            .iter()
            .map(|v| match v {
                Some(value) if !value.is_null() => value.key_text(),
                _ => NULL_KEY_PART.to_string(),
            })
            .collect::<Vec<_>>()
            .join("|"),
    )
}

/// Database name of a property on `metadata`, or the property itself when unknown.
pub(crate) fn column_name(metadata: &EntityMetadata, property: &str) -> String {
    metadata
        .find_column_with_property_path(property)
        .map(|c| c.database_name.clone())
        .unwrap_or_else(|| property.to_string())
}

/// Where the keys of a relation's related records live.
///
/// For an inverse relation that is the target table; for a many-to-many
/// relation it is the junction table.
#[derive(Debug, Clone)]
pub(crate) struct RelatedKeys {
    /// Entity name or junction table path
    pub target: String,
    /// `(column on target, parent column it references)`
    pub parent_columns: Vec<(String, String)>,
    /// `(column on target, property of the related entity it holds)`
    pub id_columns: Vec<(String, String)>,
}

impl RelatedKeys {
    /// Locate the related keys of `relation`, held by `parent`.
    ///
    /// Returns `None` for a to-one owner: its keys are the parent's own join columns.
    pub(crate) fn resolve(
        registry: &MetadataRegistry,
        parent: &EntityMetadata,
        relation: &RelationMetadata,
    ) -> OrmResult<Option<Self>> {
        if relation.is_to_one_owner() {
            return Ok(None);
        }
        if relation.kind == RelationKind::ManyToMany {
            let junction = registry.junction(relation)?;
            return Ok(Some(Self {
                target: junction.table_name,
                parent_columns: junction
                    .owner_columns
                    .iter()
                    .map(|jc| (jc.database_name.clone(), column_name(parent, &jc.referenced_column)))
                    .collect(),
                id_columns: junction
                    .inverse_columns
                    .into_iter()
                    .map(|jc| (jc.database_name, jc.referenced_column))
                    .collect(),
            }));
        }
        let (target, inverse) = registry.inverse_relation(relation)?;
        Ok(Some(Self {
            target: target.name.clone(),
            parent_columns: inverse
                .join_columns
                .iter()
                .map(|jc| (jc.database_name.clone(), column_name(parent, &jc.referenced_column)))
                .collect(),
            id_columns: target
                .primary_columns()
                .map(|c| (c.database_name.clone(), c.property_path.clone()))
                .collect(),
        }))
    }

    /// Parent columns, as selected on the parent alias.
    pub(crate) fn parent_key_columns(&self) -> Vec<String> {
        self.parent_columns.iter().map(|(_, parent)| parent.clone()).collect()
    }

    /// SELECT over the related records of `parents`, exposing the parent key as `parent_{i}`.
    pub(crate) fn query(
        &self,
        source: &DataSource,
        runner: &QueryRunner,
        parents: &[Vec<Value>],
    ) -> SelectQueryBuilder {
        let dialect = source.dialect();
        let column_ref = |column: &str| self.column_ref(dialect, column);

        let mut qb = source.create_query_builder();
        qb.set_query_runner(runner.clone());
        qb.from(&self.target, RELATED_ALIAS);
        for (i, (column, _)) in self.parent_columns.iter().enumerate() {
            qb.add_select_as(column_ref(column), format!("parent_{i}"));
        }

        let condition = match self.parent_columns.as_slice() {
            [(column, _)] => {
                let values = parents.iter().filter_map(|p| p.first().cloned()).collect();
                RawCondition::opaque(format!("{} IN (:...orm_relation_parents)", column_ref(column)))
                    .param("orm_relation_parents", Value::Array(values))
            }
            columns => {
                let mut alternatives = Vec::with_capacity(parents.len());
                let mut params = Vec::new();
                for (i, values) in parents.iter().enumerate() {
                    let keys: Vec<String> = columns
                        .iter()
                        .zip(values)
                        .enumerate()
                        .map(|(j, ((column, _), value))| {
                            let name = format!("orm_relation_parent_{i}_{j}");
                            params.push((name.clone(), value.clone()));
                            format!("{} = :{name}", column_ref(column))
                        })
                        .collect();
                    alternatives.push(format!("({})", keys.join(" AND ")));
                }
                let sql = if alternatives.is_empty() {
                    "0=1".to_string()
                } else {
                    format!("({})", alternatives.join(" OR "))
                };
                params
                    .into_iter()
                    .fold(RawCondition::opaque(sql), |raw, (name, value)| raw.param(name, value))
            }
        };
        qb.where_(condition);
        qb
    }

    pub(crate) fn column_ref(&self, dialect: Dialect, column: &str) -> String {
        format!("{}.{}", dialect.escape(RELATED_ALIAS), dialect.escape(column))
    }
}

const RELATED_ALIAS: &str = "rel";

/// Distinct non-null values of `columns` on `alias`, in first-seen order.
pub(crate) fn collect_parents(dialect: Dialect, rows: &[Row], alias: &str, columns: &[String]) -> Vec<Vec<Value>> {
    let mut seen = HashSet::new();
    let mut parents = Vec::new();
    for row in rows {
        let Some(key) = row_key(dialect, row, alias, columns) else {
            continue;
        };
        if seen.insert(key) {
            parents.push(
                columns
                    .iter()
                    .map(|c| {
                        row.get(&dialect.build_column_alias(alias, c))
                            .cloned()
                            .unwrap_or(Value::Null)
                    })
                    .collect(),
            );
        }
    }
    parents
}

/// Key of a loader result row: its `parent_{i}` values.
pub(crate) fn parent_key(row: &Row, width: usize) -> Option<String> {
    let names: Vec<String> = (0..width).map(|i| format!("parent_{i}")).collect();
    let values: Vec<Option<&Value>> = names.iter().map(|n| row.get(n)).collect();
    key_of(&values)
}
