//! Shared WHERE clause builder for SELECT, UPDATE, DELETE and relation queries.

use std::sync::Arc;

use super::condition::{BoundOp, Brackets, Condition, FindValue, FindWhere, Op, WhereClause, WhereInput, WhereKind};
use super::expression_map::ExpressionMap;
use crate::error::{OrmError, OrmResult};
use crate::metadata::{ColumnMetadata, EntityMetadata};
use crate::value::Value;

/// Fluent WHERE methods shared by every builder that filters rows.
///
/// Errors found while lowering a condition (unknown property, missing id) do
/// not break the chain; they surface when the query is compiled or executed.
pub trait WhereExpressionBuilder: Sized {
    fn expression_map_mut(&mut self) -> &mut ExpressionMap;

    /// Replace all WHERE conditions.
    fn where_<'a>(&mut self, input: impl Into<WhereInput<'a>>) -> &mut Self {
        let map = self.expression_map_mut();
        map.wheres.clear();
        push_where(map, WhereKind::Simple, input.into());
        self
    }

    fn and_where<'a>(&mut self, input: impl Into<WhereInput<'a>>) -> &mut Self {
        push_where(self.expression_map_mut(), WhereKind::And, input.into());
        self
    }

    fn or_where<'a>(&mut self, input: impl Into<WhereInput<'a>>) -> &mut Self {
        push_where(self.expression_map_mut(), WhereKind::Or, input.into());
        self
    }

    /// Replace all WHERE conditions with a primary key lookup.
    ///
    /// Each id is a bare value (single-key entities) or an id map.
    fn where_in_ids<I>(&mut self, ids: I) -> &mut Self
    where
        I: IntoIterator<Item = serde_json::Value>,
    {
        let map = self.expression_map_mut();
        map.wheres.clear();
        push_ids(map, WhereKind::Simple, ids.into_iter().collect());
        self
    }

    fn and_where_in_ids<I>(&mut self, ids: I) -> &mut Self
    where
        I: IntoIterator<Item = serde_json::Value>,
    {
        push_ids(self.expression_map_mut(), WhereKind::And, ids.into_iter().collect());
        self
    }

    fn or_where_in_ids<I>(&mut self, ids: I) -> &mut Self
    where
        I: IntoIterator<Item = serde_json::Value>,
    {
        push_ids(self.expression_map_mut(), WhereKind::Or, ids.into_iter().collect());
        self
    }
}

/// Builder handed to a [`Brackets`] closure.
#[derive(Debug)]
pub struct WhereExpression {
    pub(crate) map: ExpressionMap,
}

impl WhereExpressionBuilder for WhereExpression {
    fn expression_map_mut(&mut self) -> &mut ExpressionMap {
        &mut self.map
    }
}

fn push_where(map: &mut ExpressionMap, kind: WhereKind, input: WhereInput<'_>) {
    let lowered = lower_condition(map, input);
    if let Some(condition) = map.record(lowered) {
        map.wheres.push(WhereClause { kind, condition });
    }
}

fn push_ids(map: &mut ExpressionMap, kind: WhereKind, ids: Vec<serde_json::Value>) {
    let lowered = create_where_ids_expression(map, ids);
    if let Some(condition) = map.record(lowered) {
        map.wheres.push(WhereClause { kind, condition });
    }
}

/// Lower any accepted input into a bound condition against the main alias.
pub(crate) fn lower_condition(map: &mut ExpressionMap, input: WhereInput<'_>) -> OrmResult<Condition> {
    match input {
        WhereInput::Raw(raw) => {
            map.merge_parameters(raw.params);
            Ok(if raw.opaque {
                Condition::Opaque(raw.sql)
            } else {
                Condition::Raw(raw.sql)
            })
        }
        WhereInput::Find(find) => {
            let alias = map.main_alias()?.name.clone();
            resolve_find_where(map, &alias, find)
        }
        WhereInput::AnyOf(alternatives) => {
            let alias = map.main_alias()?.name.clone();
            let conditions = alternatives
                .into_iter()
                .map(|find| resolve_find_where(map, &alias, find))
                .collect::<OrmResult<Vec<_>>>()?;
            Ok(Condition::Or(conditions))
        }
        WhereInput::Brackets(brackets) => lower_brackets(map, brackets),
    }
}

fn lower_brackets(map: &mut ExpressionMap, brackets: Brackets<'_>) -> OrmResult<Condition> {
    let mut expression = WhereExpression {
        map: map.derive_child(),
    };
    (brackets.build)(&mut expression);

    let child = expression.map;
    map.merge_parameters(child.parameters);
    if let Some(err) = child.build_error {
        return Err(err);
    }
    Ok(Condition::Group {
        clauses: child.wheres,
        negate: brackets.negate,
    })
}

/// Resolve property-keyed conditions against `alias`.
pub(crate) fn resolve_find_where(map: &mut ExpressionMap, alias: &str, find: FindWhere) -> OrmResult<Condition> {
    let metadata = map.aliases.get(alias)?.metadata.clone();
    let mut parts = Vec::new();
    for (path, value) in find.entries {
        lower_entry(map, alias, metadata.as_ref(), &path, value, &mut parts)?;
    }
    Ok(match parts.len() {
        0 => Condition::Opaque("1=1".to_string()),
        1 => parts.remove(0),
        _ => Condition::And(parts),
    })
}

fn lower_entry(
    map: &mut ExpressionMap,
    alias: &str,
    metadata: Option<&Arc<EntityMetadata>>,
    path: &str,
    value: FindValue,
    parts: &mut Vec<Condition>,
) -> OrmResult<()> {
    let Some(metadata) = metadata else {
        return match value {
            FindValue::Nested(_) => Err(OrmError::usage(format!(
                "nested condition on \"{path}\" needs an entity-bound alias"
            ))),
            FindValue::Value(v) => {
                parts.push(predicate(map, alias, path, None, Op::Eq(v)));
                Ok(())
            }
            FindValue::Op(op) => {
                parts.push(predicate(map, alias, path, None, op));
                Ok(())
            }
        };
    };

    if let Some(relation) = metadata.find_relation(path).cloned() {
        return match value {
            FindValue::Nested(inner) => {
                let joined = map.find_relation_join(alias, path).map(|j| j.alias.clone());
                if let Some(join_alias) = joined {
                    parts.push(resolve_find_where(map, &join_alias, inner)?);
                    return Ok(());
                }
                if !relation.is_to_one_owner() {
                    return Err(OrmError::usage(format!(
                        "relation {}.{path} must be joined to filter on it",
                        metadata.name
                    )));
                }
                for (referenced, inner_value) in inner.entries {
                    let column = metadata
                        .columns
                        .iter()
                        .find(|c| {
                            c.relation.as_deref() == Some(path)
                                && c.referenced_property.as_deref() == Some(referenced.as_str())
                        })
                        .cloned()
                        .ok_or_else(|| {
                            OrmError::usage(format!(
                                "relation {}.{path} must be joined to filter on \"{referenced}\"",
                                metadata.name
                            ))
                        })?;
                    let op = match inner_value {
                        FindValue::Value(v) => Op::Eq(v),
                        FindValue::Op(op) => op,
                        FindValue::Nested(_) => {
                            return Err(OrmError::usage(format!(
                                "relation {}.{path} must be joined to filter on \"{referenced}\"",
                                metadata.name
                            )));
                        }
                    };
                    let name = column.database_name.clone();
                    parts.push(predicate(map, alias, &name, Some(&column), op));
                }
                Ok(())
            }
            FindValue::Value(v) => lower_column(map, alias, metadata, path, Op::Eq(v), parts),
            FindValue::Op(op) => lower_column(map, alias, metadata, path, op, parts),
        };
    }

    match value {
        FindValue::Nested(inner) => {
            for (sub, inner_value) in inner.entries {
                let nested_path = format!("{path}.{sub}");
                lower_entry(map, alias, Some(metadata), &nested_path, inner_value, parts)?;
            }
            Ok(())
        }
        FindValue::Value(v) => lower_column(map, alias, metadata, path, Op::Eq(v), parts),
        FindValue::Op(op) => lower_column(map, alias, metadata, path, op, parts),
    }
}

fn lower_column(
    map: &mut ExpressionMap,
    alias: &str,
    metadata: &EntityMetadata,
    path: &str,
    op: Op,
    parts: &mut Vec<Condition>,
) -> OrmResult<()> {
    let columns = metadata.find_columns_with_property_path(path);
    let column = match columns.as_slice() {
        [] => return Err(OrmError::column_not_found(metadata.name.clone(), path)),
        [column] => (*column).clone(),
        _ => {
            return Err(OrmError::usage(format!(
                "property {}.{path} maps to several columns",
                metadata.name
            )));
        }
    };
    let name = column.database_name.clone();
    parts.push(predicate(map, alias, &name, Some(&column), op));
    Ok(())
}

fn predicate(map: &mut ExpressionMap, alias: &str, column: &str, meta: Option<&ColumnMetadata>, op: Op) -> Condition {
    let op = match op {
        Op::Eq(Value::Null) => BoundOp::IsNull,
        other => other.bind(map, meta),
    };
    Condition::Predicate {
        alias: Some(alias.to_string()),
        column: column.to_string(),
        op,
    }
}

/// Primary key lookup of the main alias.
///
/// Single numeric keys are inlined as literals; anything else is bound.
pub(crate) fn create_where_ids_expression(map: &mut ExpressionMap, ids: Vec<serde_json::Value>) -> OrmResult<Condition> {
    let alias = map.main_alias()?;
    let alias_name = alias.name.clone();
    let metadata = Arc::clone(alias.metadata()?);
    let dialect = map.dialect;

    let id_maps = ids
        .iter()
        .map(|id| {
            metadata.ensure_entity_id_map(id).ok_or_else(|| OrmError::EntityIdMissing {
                entity: metadata.name.clone(),
            })
        })
        .collect::<OrmResult<Vec<_>>>()?;
    if id_maps.is_empty() {
        return Ok(Condition::False);
    }

    let primaries: Vec<ColumnMetadata> = metadata.primary_columns().cloned().collect();
    let value_of = |column: &ColumnMetadata, ids: &crate::metadata::EntityObject| {
        let raw = ids.get(&column.property_path).unwrap_or(&serde_json::Value::Null);
        dialect.prepare_persistent_value(column, raw)
    };

    if let [column] = primaries.as_slice() {
        let values: Vec<Value> = id_maps.iter().map(|ids| value_of(column, ids)).collect();
        let literals: Option<Vec<String>> = values.iter().map(Value::numeric_literal).collect();
        let op = match literals {
            Some(literals) => BoundOp::InLiteral(literals),
            None => BoundOp::In(map.bind(Value::Array(values))),
        };
        return Ok(Condition::Predicate {
            alias: Some(alias_name),
            column: column.database_name.clone(),
            op,
        });
    }

    let alternatives = id_maps
        .iter()
        .map(|ids| {
            let keys = primaries
                .iter()
                .map(|column| {
                    let name = map.bind(value_of(column, ids));
                    Condition::Predicate {
                        alias: Some(alias_name.clone()),
                        column: column.database_name.clone(),
                        op: BoundOp::Eq(name),
                    }
                })
                .collect();
            Condition::And(keys)
        })
        .collect();
    Ok(Condition::Or(alternatives))
}
