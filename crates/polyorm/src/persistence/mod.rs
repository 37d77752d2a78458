//! Change tracking and relation writes.
//!
//! [`Subject`] holds one entity's pending write together with the change map
//! computed against the row last loaded from the database.
//! [`RelationUpdater`] and [`RelationRemover`] issue the foreign key updates
//! and junction inserts/deletes behind the relation builder.

mod relation_updater;
mod subject;

#[cfg(test)]
mod tests;

pub use relation_updater::{RelationRemover, RelationUpdater};
pub use subject::{ChangeEntry, ChangeTarget, Subject, SubjectAction, compute_diff, values_equal};

use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::metadata::{EntityMetadata, EntityObject, JoinColumn, get_path};
use crate::query::RawCondition;
use crate::value::Value;

/// Value of the referenced side of `join_column`, read from an id map of `metadata`.
pub(crate) fn referenced_value(
    dialect: Dialect,
    metadata: &EntityMetadata,
    ids: &EntityObject,
    join_column: &JoinColumn,
) -> OrmResult<Value> {
    let column = metadata
        .find_column_with_database_name(&join_column.referenced_column)
        .ok_or_else(|| OrmError::column_not_found(metadata.name.clone(), join_column.referenced_column.clone()))?;
    let value = get_path(ids, &column.property_path).ok_or_else(|| OrmError::EntityIdMissing {
        entity: metadata.name.clone(),
    })?;
    Ok(dialect.prepare_persistent_value(column, value))
}

/// `(a = :p AND b = :q) OR (...)` over key tuples, or `1=0` for none.
///
/// Columns are qualified with `alias` when one is given; parameters are
/// named `{prefix}_{row}_{column}`.
pub(crate) fn key_match_condition(
    dialect: Dialect,
    alias: Option<&str>,
    columns: &[String],
    rows: Vec<Vec<Value>>,
    prefix: &str,
) -> RawCondition {
    if rows.is_empty() {
        return RawCondition::opaque("1=0");
    }
    let column_ref = |column: &str| match alias {
        Some(alias) => format!("{}.{}", dialect.escape(alias), dialect.escape(column)),
        None => dialect.escape(column),
    };

    let mut params = Vec::new();
    let alternatives: Vec<String> = rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let keys: Vec<String> = columns
                .iter()
                .zip(row)
                .enumerate()
                .map(|(j, (column, value))| {
                    let name = format!("{prefix}_{i}_{j}");
                    let sql = format!("{} = :{name}", column_ref(column));
                    params.push((name, value));
                    sql
                })
                .collect();
            keys.join(" AND ")
        })
        .collect();

    let sql = if alternatives.len() == 1 {
        alternatives.concat()
    } else {
        format!("(({}))", alternatives.join(") OR ("))
    };
    params
        .into_iter()
        .fold(RawCondition::opaque(sql), |condition, (name, value)| condition.param(name, value))
}
