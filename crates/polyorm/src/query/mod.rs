//! Query builders.
//!
//! Every builder owns an [`ExpressionMap`] that fluent calls mutate. Values are
//! bound to named parameters when the fluent call is made, so compiling a
//! builder twice yields byte-identical SQL.
//!
//! ```ignore
//! use polyorm::prelude::*;
//!
//! let mut qb = source.query_builder("User", "user");
//! qb.left_join_and_select("user.photos", "photo")
//!     .where_(FindWhere::new().eq("firstName", "Timber"))
//!     .order_by("user.id", Order::Desc)
//!     .take(10);
//! let users = qb.get_many().await?;
//! ```

pub mod alias;
pub mod condition;
pub mod delete;
pub(crate) mod execution;
pub mod expression_map;
pub mod insert;
pub mod relation;
pub(crate) mod replace;
pub mod results;
pub mod select;
pub mod soft_delete;
pub mod update;
pub mod where_builder;

#[cfg(test)]
mod tests;

use std::collections::HashMap;

pub use alias::{Alias, AliasDescriptor, AliasRegistry, AliasType};
pub use condition::{Brackets, FindValue, FindWhere, Op, RawCondition, WhereInput, raw};
pub use delete::DeleteQueryBuilder;
pub use expression_map::{ExpressionMap, JoinDirection, LockVersion, Nulls, Order, Returning};
pub use insert::InsertQueryBuilder;
pub use relation::RelationQueryBuilder;
pub use results::{DeleteResult, InsertResult, UpdateResult};
pub use select::{SelectQueryBuilder, SelectStream};
pub use soft_delete::SoftDeleteQueryBuilder;
pub use update::UpdateQueryBuilder;
pub use where_builder::{WhereExpression, WhereExpressionBuilder};

use crate::dialect::{ReturningStyle, StatementKind, escape_query_with_parameters};
use crate::error::{OrmError, OrmResult};
use crate::metadata::{EntityMetadata, MetadataRegistry};
use crate::runner::QueryRunner;
use crate::value::Value;
use condition::{RenderContext, render_clauses};

/// Statement family an [`ExpressionMap`] compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    SoftDelete,
    Restore,
    Relation,
}

/// Base trait for query builders.
pub trait QueryBuilder: Sized {
    fn expression_map(&self) -> &ExpressionMap;

    fn map_mut(&mut self) -> &mut ExpressionMap;

    fn runner_slot(&mut self) -> &mut Option<QueryRunner>;

    /// Compile to SQL with `:name` parameter references.
    fn build_query(&self) -> OrmResult<String>;

    /// Execute on this runner instead of a fresh one. The caller keeps ownership of it.
    fn set_query_runner(&mut self, runner: QueryRunner) -> &mut Self {
        *self.runner_slot() = Some(runner);
        self
    }

    /// Wrap execution in a transaction unless one is already active.
    fn use_transaction(&mut self, enabled: bool) -> &mut Self {
        self.map_mut().use_transaction = enabled;
        self
    }

    /// Run entity listeners and subscribers around execution (default on).
    fn call_listeners(&mut self, enabled: bool) -> &mut Self {
        self.map_mut().call_listeners = enabled;
        self
    }

    fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.map_mut().set_parameter(name, value.into());
        self
    }

    fn set_parameters<I, K, V>(&mut self, parameters: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let map = self.map_mut();
        for (name, value) in parameters {
            map.set_parameter(name, value.into());
        }
        self
    }

    /// Positional values bound ahead of every named parameter.
    fn set_native_parameters(&mut self, values: Vec<Value>) -> &mut Self {
        self.map_mut().native_parameters = values;
        self
    }

    /// Turn identifier quoting off (or back on).
    fn disable_escaping(&mut self, disabled: bool) -> &mut Self {
        self.map_mut().disable_escaping = disabled;
        self
    }

    /// Compiled SQL with named parameter references.
    fn get_query(&self) -> OrmResult<String> {
        self.expression_map().check()?;
        self.build_query()
    }

    fn get_parameters(&self) -> HashMap<String, Value> {
        self.expression_map().parameters.clone()
    }

    /// SQL with dialect placeholders and the ordered values to bind.
    fn get_query_and_parameters(&self) -> OrmResult<(String, Vec<Value>)> {
        let sql = self.get_query()?;
        let map = self.expression_map();
        escape_query_with_parameters(map.dialect, &sql, &map.parameters, &map.native_parameters)
    }

    /// SQL with dialect placeholders.
    fn get_sql(&self) -> OrmResult<String> {
        Ok(self.get_query_and_parameters()?.0)
    }
}

/// Register `target` (an entity name or a table path) as the main FROM alias.
///
/// Returns the alias name; it defaults to the entity name or the table path.
pub(crate) fn register_main_alias(
    map: &mut ExpressionMap,
    registry: &MetadataRegistry,
    target: &str,
    alias: Option<&str>,
) -> OrmResult<String> {
    let name = register_from_alias(map, registry, target, alias)?;
    map.aliases.set_main_alias(&name)?;
    Ok(name)
}

/// Register `target` as a FROM alias without making it the main one.
pub(crate) fn register_from_alias(
    map: &mut ExpressionMap,
    registry: &MetadataRegistry,
    target: &str,
    alias: Option<&str>,
) -> OrmResult<String> {
    let descriptor = match registry.find(target) {
        Some(metadata) => {
            if metadata.parent().is_some() {
                let values = discriminator_values(registry, &metadata);
                map.set_parameter("discriminatorColumnValues", Value::Array(values));
            }
            let name = alias.map(str::to_string).unwrap_or_else(|| metadata.name.clone());
            AliasDescriptor::new(AliasType::From).named(name).entity(metadata)
        }
        None => {
            let name = alias.unwrap_or(target).to_string();
            AliasDescriptor::new(AliasType::From).named(name).table(target)
        }
    };
    Ok(map.aliases.create_alias(descriptor)?.name.clone())
}

/// Discriminator values an STI child query matches: its own and its descendants'.
pub(crate) fn discriminator_values(registry: &MetadataRegistry, metadata: &EntityMetadata) -> Vec<Value> {
    let own = metadata
        .inheritance
        .as_ref()
        .map(|i| i.discriminator_value.clone())
        .or_else(|| metadata.discriminator_value.clone());
    own.into_iter()
        .chain(
            registry
                .descendants(&metadata.name)
                .iter()
                .filter_map(|child| child.inheritance.as_ref().map(|i| i.discriminator_value.clone())),
        )
        .map(Value::Text)
        .collect()
}

/// ` WHERE ...` for the main alias: user conditions, the soft-delete filter
/// (SELECT only), the discriminator filter and any extra appended condition.
pub(crate) fn compile_where(map: &ExpressionMap, prefix_alias: bool) -> OrmResult<String> {
    let ctx = RenderContext::new(map, prefix_alias);
    let mut conditions = Vec::new();
    if !map.wheres.is_empty() {
        conditions.push(render_clauses(&map.wheres, &ctx)?);
    }

    if let Ok(main) = map.main_alias() {
        if let Some(metadata) = &main.metadata {
            let column_ref = |column: &str| {
                if prefix_alias {
                    format!("{}.{}", map.escape(&main.name), map.escape(column))
                } else {
                    map.escape(column)
                }
            };
            if map.query_kind == QueryKind::Select && !map.with_deleted {
                if let Some(column) = metadata.delete_date_column() {
                    conditions.push(format!("{} IS NULL", column_ref(&column.database_name)));
                }
            }
            if metadata.parent().is_some() {
                if let Some(column) = metadata.discriminator_column() {
                    conditions.push(format!(
                        "{} IN (:...discriminatorColumnValues)",
                        column_ref(&column.database_name)
                    ));
                }
            }
        }
    }

    if let Some(extra) = &map.extra_where {
        conditions.push(extra.clone());
    }

    Ok(match conditions.len() {
        0 => String::new(),
        1 => format!(" WHERE {}", conditions[0]),
        _ => format!(" WHERE ( {} )", conditions.join(" ) AND ( ")),
    })
}

/// Columns read back from a write statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReturningColumns {
    Raw(String),
    /// Database column names
    Columns(Vec<String>),
}

/// Explicit `returning()` columns, or the generated ones when the entity is updated in place.
pub(crate) fn returning_columns(map: &ExpressionMap, kind: StatementKind) -> OrmResult<Option<ReturningColumns>> {
    let dialect = map.dialect;
    let metadata = map.main_alias().ok().and_then(|a| a.metadata.clone());

    if let Some(returning) = &map.returning {
        if !dialect.is_returning_supported(kind) {
            return Err(OrmError::ReturningNotSupported {
                dialect: dialect.name(),
                statement: kind.name(),
            });
        }
        return Ok(Some(match returning {
            Returning::Raw(sql) => ReturningColumns::Raw(sql.clone()),
            Returning::Columns(properties) => ReturningColumns::Columns(
                properties
                    .iter()
                    .flat_map(|property| {
                        let found: Vec<String> = metadata
                            .as_ref()
                            .map(|m| {
                                m.find_columns_with_property_path(property)
                                    .into_iter()
                                    .map(|c| c.database_name.clone())
                                    .collect()
                            })
                            .unwrap_or_default();
                        if found.is_empty() { vec![property.clone()] } else { found }
                    })
                    .collect(),
            ),
        }));
    }

    if !map.update_entity || !dialect.is_returning_supported(kind) {
        return Ok(None);
    }
    let Some(metadata) = metadata else {
        return Ok(None);
    };
    let columns: Vec<String> = metadata
        .columns
        .iter()
        .filter(|c| !c.is_virtual)
        .filter(|c| match kind {
            StatementKind::Insert => {
                c.default.is_some()
                    || c.generation.is_some()
                    || c.is_create_date
                    || c.is_update_date
                    || c.is_delete_date
                    || c.is_version
            }
            StatementKind::Update => c.is_update_date || c.is_version,
            StatementKind::Delete => false,
        })
        .map(|c| c.database_name.clone())
        .collect();
    Ok((!columns.is_empty()).then_some(ReturningColumns::Columns(columns)))
}

/// `OUTPUT INSERTED.x` clause for dialects that read rows back that way.
pub(crate) fn output_clause(map: &ExpressionMap, kind: StatementKind, columns: Option<&ReturningColumns>) -> String {
    if map.dialect.returning_style() != ReturningStyle::Output {
        return String::new();
    }
    let prefix = if kind == StatementKind::Delete { "DELETED" } else { "INSERTED" };
    match columns {
        None => String::new(),
        Some(ReturningColumns::Raw(sql)) => format!(" OUTPUT {sql}"),
        Some(ReturningColumns::Columns(columns)) => format!(
            " OUTPUT {}",
            columns
                .iter()
                .map(|c| format!("{prefix}.{}", map.escape(c)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Trailing `RETURNING x` clause.
pub(crate) fn returning_clause(map: &ExpressionMap, columns: Option<&ReturningColumns>) -> String {
    if map.dialect.returning_style() != ReturningStyle::Returning {
        return String::new();
    }
    match columns {
        None => String::new(),
        Some(ReturningColumns::Raw(sql)) => format!(" RETURNING {sql}"),
        Some(ReturningColumns::Columns(columns)) => format!(
            " RETURNING {}",
            columns.iter().map(|c| map.escape(c)).collect::<Vec<_>>().join(", ")
        ),
    }
}

/// Property-keyed values of a row returned by a write statement.
pub(crate) fn generated_map(map: &ExpressionMap, row: &crate::row::Row) -> crate::metadata::EntityObject {
    let metadata = map.main_alias().ok().and_then(|a| a.metadata.as_ref());
    let mut generated = crate::metadata::EntityObject::new();
    for (column_name, value) in row.iter() {
        match metadata.and_then(|m| m.find_column_with_database_name(column_name)) {
            Some(column) => column.set_entity_value(&mut generated, map.dialect.prepare_hydrated_value(column, value)),
            None => {
                generated.insert(column_name.to_string(), value.to_json());
            }
        }
    }
    generated
}

/// Escaped table of the main alias, as written after INSERT INTO / UPDATE / DELETE FROM.
pub(crate) fn main_table(map: &ExpressionMap) -> OrmResult<String> {
    Ok(map.main_alias()?.source_sql(map.dialect))
}

/// ` ORDER BY ... LIMIT n` of an UPDATE or DELETE, where the dialect allows one.
pub(crate) fn write_limit_clause(map: &ExpressionMap) -> OrmResult<String> {
    if map.order_bys.is_empty() && map.limit.is_none() {
        return Ok(String::new());
    }
    if !map.dialect.supports_update_limit() {
        return Err(OrmError::unsupported(map.dialect.name(), "ORDER BY and LIMIT in UPDATE or DELETE"));
    }
    let mut sql = String::new();
    if !map.order_bys.is_empty() {
        let orders: Vec<String> = map
            .order_bys
            .iter()
            .map(|o| {
                format!(
                    "{} {}",
                    replace::replace_property_names_in(&o.expression, map.dialect, &map.aliases, false),
                    o.order.as_sql()
                )
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&orders.join(", "));
    }
    if let Some(limit) = map.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    Ok(sql)
}
