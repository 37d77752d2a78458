use std::sync::Arc;

use super::execution::{WriteStatement, execute_write};
use super::expression_map::{ExpressionMap, Order, OrderBy, Returning};
use super::results::UpdateResult;
use super::where_builder::{WhereExpressionBuilder, create_where_ids_expression};
use super::condition::{WhereClause, WhereKind};
use super::{
    QueryBuilder, QueryKind, compile_where, generated_map, main_table, output_clause, returning_clause,
    register_main_alias, returning_columns, write_limit_clause,
};
use crate::connection::DataSource;
use crate::dialect::StatementKind;
use crate::error::{OrmError, OrmResult};
use crate::metadata::{EntityMetadata, EntityObject};
use crate::runner::{ListenerKind, QueryRunner};
use crate::value::Value;

const UPDATE_PARAMETER_PREFIX: &str = "orm_update_";

/// UPDATE builder.
///
/// ```ignore
/// source
///     .update_builder("User")
///     .set(json!({"firstName": "Timber"}).as_object().cloned().unwrap_or_default())
///     .where_("user.id = :id")
///     .set_parameter("id", 1)
///     .execute()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct UpdateQueryBuilder {
    source: DataSource,
    runner: Option<QueryRunner>,
    map: ExpressionMap,
}

impl QueryBuilder for UpdateQueryBuilder {
    fn expression_map(&self) -> &ExpressionMap {
        &self.map
    }

    fn map_mut(&mut self) -> &mut ExpressionMap {
        &mut self.map
    }

    fn runner_slot(&mut self) -> &mut Option<QueryRunner> {
        &mut self.runner
    }

    fn build_query(&self) -> OrmResult<String> {
        compile_update(&self.map)
    }
}

impl WhereExpressionBuilder for UpdateQueryBuilder {
    fn expression_map_mut(&mut self) -> &mut ExpressionMap {
        &mut self.map
    }
}

impl UpdateQueryBuilder {
    pub(crate) fn new(source: DataSource, runner: Option<QueryRunner>, target: &str) -> Self {
        let mut map = ExpressionMap::new(source.dialect(), QueryKind::Update);
        let registry = Arc::clone(source.registry());
        let result = register_main_alias(&mut map, &registry, target, None);
        map.record(result);
        Self { source, runner, map }
    }

    pub(crate) fn from_parts(source: DataSource, runner: Option<QueryRunner>, map: ExpressionMap) -> Self {
        Self { source, runner, map }
    }

    /// Values to write, keyed by property path.
    ///
    /// A to-one relation takes the related object (`{"id": 3}`) or its bare id.
    /// Replaces earlier `set` values; raw assignments are kept.
    pub fn set(&mut self, values: EntityObject) -> &mut Self {
        self.map.values_set = vec![values];
        let result = bind_assignments(&mut self.map);
        self.map.record(result);
        self
    }

    /// `property = <sql>` assignment, emitted verbatim.
    pub fn set_raw(&mut self, property: &str, sql: impl Into<String>) -> &mut Self {
        let result = resolve_target_columns(&self.map, property);
        if let Some(columns) = self.map.record(result) {
            let sql = sql.into();
            for column in columns {
                self.map.assignments.retain(|(c, _)| *c != column);
                self.map.assignments.push((column, sql.clone()));
            }
        }
        self
    }

    /// Restrict the update to these entities, by primary key.
    pub fn where_entity(&mut self, entities: Vec<EntityObject>) -> &mut Self {
        where_entity(&mut self.map, entities);
        self
    }

    pub fn returning<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.map.returning = Some(Returning::Columns(columns.into_iter().map(Into::into).collect()));
        self
    }

    pub fn returning_raw(&mut self, sql: impl Into<String>) -> &mut Self {
        self.map.returning = Some(Returning::Raw(sql.into()));
        self
    }

    /// Read the new version and update date back where the dialect can (default on).
    pub fn update_entity(&mut self, enabled: bool) -> &mut Self {
        self.map.update_entity = enabled;
        self
    }

    /// MySQL and MariaDB only.
    pub fn order_by(&mut self, expression: impl Into<String>, order: Order) -> &mut Self {
        self.map.order_bys = vec![OrderBy {
            expression: expression.into(),
            order,
            nulls: None,
        }];
        self
    }

    /// MySQL and MariaDB only.
    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.map.limit = Some(limit);
        self
    }

    pub async fn execute(&self) -> OrmResult<UpdateResult> {
        let statement = WriteStatement {
            listeners: Some((ListenerKind::BeforeUpdate, ListenerKind::AfterUpdate)),
            compile: compile_update,
            rebind: Some(bind_assignments),
        };
        let result = execute_write(&self.source, self.runner.clone(), self.map.clone(), statement).await?;
        Ok(UpdateResult {
            generated_maps: result.records.iter().map(|row| generated_map(&self.map, row)).collect(),
            affected: result.affected,
            raw: result.raw,
        })
    }
}

/// Primary key condition built from entity objects, ANDed to the wheres.
pub(crate) fn where_entity(map: &mut ExpressionMap, entities: Vec<EntityObject>) {
    let ids = entities.iter().map(|e| serde_json::Value::Object(e.clone())).collect();
    let lowered = create_where_ids_expression(map, ids);
    if let Some(condition) = map.record(lowered) {
        let kind = if map.wheres.is_empty() { WhereKind::Simple } else { WhereKind::And };
        map.wheres.push(WhereClause { kind, condition });
    }
    map.where_entities.extend(entities);
}

/// Database columns written for `property`.
fn resolve_target_columns(map: &ExpressionMap, property: &str) -> OrmResult<Vec<String>> {
    let Some(metadata) = map.main_alias()?.metadata.as_ref() else {
        return Ok(vec![property.to_string()]);
    };
    let columns = metadata.find_columns_with_property_path(property);
    if columns.is_empty() {
        return Err(OrmError::column_not_found(metadata.name.clone(), property));
    }
    Ok(columns.into_iter().map(|c| c.database_name.clone()).collect())
}

/// Rebuild the bound `column = :param` assignments from the `set` values.
pub(crate) fn bind_assignments(map: &mut ExpressionMap) -> OrmResult<()> {
    let Some(values) = map.values_set.first().cloned() else {
        return Ok(());
    };
    let metadata = map.main_alias()?.metadata.clone();

    map.parameters.retain(|name, _| !name.starts_with(UPDATE_PARAMETER_PREFIX));
    let bound_prefix = format!(":{UPDATE_PARAMETER_PREFIX}");
    map.assignments.retain(|(_, sql)| !sql.starts_with(&bound_prefix));

    let bound = match &metadata {
        Some(metadata) => entity_assignments(map, metadata, &values)?,
        None => values.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect(),
    };
    let mut assignments = Vec::with_capacity(bound.len() + map.assignments.len());
    for (i, (column, value)) in bound.into_iter().enumerate() {
        let name = format!("{UPDATE_PARAMETER_PREFIX}{i}");
        map.set_parameter(name.clone(), value);
        assignments.push((column, format!(":{name}")));
    }
    for (column, sql) in std::mem::take(&mut map.assignments) {
        assignments.retain(|(c, _)| *c != column);
        assignments.push((column, sql));
    }
    map.assignments = assignments;
    Ok(())
}

fn entity_assignments(
    map: &ExpressionMap,
    metadata: &EntityMetadata,
    values: &EntityObject,
) -> OrmResult<Vec<(String, Value)>> {
    let mut out: Vec<(String, Value)> = Vec::new();
    for property in values.keys() {
        if let Some(relation) = metadata.find_relation(property) {
            if !relation.is_to_one_owner() {
                return Err(OrmError::usage(format!(
                    "cannot set {} relation {}.{property} in an update; use the relation builder",
                    relation.kind.name(),
                    metadata.name
                )));
            }
        }
        let columns = metadata.find_columns_with_property_path(property);
        if columns.is_empty() {
            return Err(OrmError::column_not_found(metadata.name.clone(), property.clone()));
        }
        for column in columns {
            if column.is_virtual || !column.is_update {
                continue;
            }
            let Some(value) = column.get_entity_value(values) else {
                continue;
            };
            let value = map.dialect.prepare_persistent_value(column, value);
            out.retain(|(c, _)| *c != column.database_name);
            out.push((column.database_name.clone(), value));
        }
    }
    Ok(out)
}

/// `"version" = "version" + 1` and `"updatedAt" = CURRENT_TIMESTAMP`, unless already assigned.
pub(crate) fn automatic_assignments(map: &ExpressionMap, assigned: &[(String, String)]) -> Vec<String> {
    let Some(metadata) = map.main_alias().ok().and_then(|a| a.metadata.as_ref()) else {
        return Vec::new();
    };
    let is_assigned = |name: &str| assigned.iter().any(|(c, _)| c == name);
    let mut out = Vec::new();
    if let Some(column) = metadata.version_column() {
        if !is_assigned(&column.database_name) {
            let name = map.escape(&column.database_name);
            out.push(format!("{name} = {name} + 1"));
        }
    }
    if let Some(column) = metadata.update_date_column() {
        if !is_assigned(&column.database_name) {
            out.push(format!(
                "{} = {}",
                map.escape(&column.database_name),
                map.dialect.current_timestamp()
            ));
        }
    }
    out
}

/// Compile an UPDATE expression map.
pub(crate) fn compile_update(map: &ExpressionMap) -> OrmResult<String> {
    if map.assignments.is_empty() {
        return Err(OrmError::UpdateValuesMissing);
    }
    let mut sets: Vec<String> = map
        .assignments
        .iter()
        .map(|(column, sql)| format!("{} = {sql}", map.escape(column)))
        .collect();
    sets.extend(automatic_assignments(map, &map.assignments));
    compile_update_statement(map, &sets)
}

/// `UPDATE <table> SET ... [OUTPUT] WHERE ... [ORDER BY/LIMIT] [RETURNING]`.
pub(crate) fn compile_update_statement(map: &ExpressionMap, sets: &[String]) -> OrmResult<String> {
    let returning = returning_columns(map, StatementKind::Update)?;
    Ok(format!(
        "UPDATE {} SET {}{}{}{}{}",
        main_table(map)?,
        sets.join(", "),
        output_clause(map, StatementKind::Update, returning.as_ref()),
        compile_where(map, false)?,
        write_limit_clause(map)?,
        returning_clause(map, returning.as_ref())
    ))
}
