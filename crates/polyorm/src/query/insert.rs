use std::sync::Arc;

use super::alias::AliasType;
use super::execution::run_in_runner;
use super::expression_map::{ExpressionMap, OnUpdate, Returning};
use super::results::InsertResult;
use super::{
    QueryBuilder, QueryKind, generated_map, main_table, output_clause, register_main_alias,
    returning_clause, returning_columns,
};
use crate::connection::DataSource;
use crate::dialect::{InsertIdStrategy, StatementKind, UpsertStyle, escape_query_with_parameters};
use crate::driver::ReplicationMode;
use crate::error::{OrmError, OrmResult};
use crate::metadata::{ColumnMetadata, EntityMetadata, EntityObject, GenerationStrategy, set_path};
use crate::runner::{ListenerKind, QueryResult, QueryRunner};
use crate::value::Value;

/// INSERT builder.
///
/// ```ignore
/// let result = source
///     .insert_builder()
///     .into_table("User")
///     .values(vec![timber, phantom])
///     .or_update(["firstName"], ["id"], false)
///     .execute()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct InsertQueryBuilder {
    source: DataSource,
    runner: Option<QueryRunner>,
    map: ExpressionMap,
}

impl QueryBuilder for InsertQueryBuilder {
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
        compile_insert(&self.map)
    }
}

impl InsertQueryBuilder {
    pub(crate) fn new(source: DataSource, runner: Option<QueryRunner>) -> Self {
        let map = ExpressionMap::new(source.dialect(), QueryKind::Insert);
        Self { source, runner, map }
    }

    pub(crate) fn from_parts(source: DataSource, runner: Option<QueryRunner>, map: ExpressionMap) -> Self {
        Self { source, runner, map }
    }

    /// Target entity or table.
    pub fn into_table(&mut self, target: &str) -> &mut Self {
        self.map.aliases.remove_kind(AliasType::From);
        let registry = Arc::clone(self.source.registry());
        let result = register_main_alias(&mut self.map, &registry, target, None);
        self.map.record(result);
        self.bind_values();
        self
    }

    /// Rows to insert. Each object is keyed by property path; relations may
    /// hold the related object or its bare id.
    pub fn values(&mut self, rows: Vec<EntityObject>) -> &mut Self {
        self.map.values_set = rows;
        self.bind_values();
        self
    }

    /// Single row shorthand for [`Self::values`].
    pub fn value(&mut self, row: EntityObject) -> &mut Self {
        self.values(vec![row])
    }

    /// Skip rows that would violate a unique constraint.
    pub fn or_ignore(&mut self) -> &mut Self {
        self.map.on_ignore = true;
        self
    }

    /// Raw conflict clause, written after `ON CONFLICT`.
    pub fn on_conflict(&mut self, statement: impl Into<String>) -> &mut Self {
        self.map.on_conflict = Some(statement.into());
        self
    }

    /// Upsert: overwrite `columns` when a row conflicts on `conflict_target`.
    ///
    /// With `skip_update_if_no_values_changed` rows whose values are unchanged
    /// are left alone (dialects with `ON CONFLICT` only).
    pub fn or_update<C, T>(&mut self, columns: C, conflict_target: T, skip_update_if_no_values_changed: bool) -> &mut Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        self.map.on_update = Some(OnUpdate {
            columns: columns.into_iter().map(Into::into).collect(),
            conflict_target: conflict_target.into_iter().map(Into::into).collect(),
            skip_update_if_no_values_changed,
        });
        self
    }

    /// Columns (property paths) to read back from the inserted rows.
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

    /// Read generated and default columns back after the insert (default on).
    pub fn update_entity(&mut self, enabled: bool) -> &mut Self {
        self.map.update_entity = enabled;
        self
    }

    fn bind_values(&mut self) {
        let result = bind_values(&mut self.map);
        self.map.record(result);
    }

    /// Run the insert.
    ///
    /// Missing UUID keys are generated client-side on dialects that cannot
    /// generate them, and before-insert listeners may still change the rows.
    pub async fn execute(&self) -> OrmResult<InsertResult> {
        self.map.check()?;
        let mut map = self.map.clone();
        let metadata = map.main_alias()?.metadata.clone();
        let mut generated = vec![EntityObject::new(); map.values_set.len()];
        if let Some(metadata) = &metadata {
            generate_client_values(&mut map, metadata, &mut generated);
        }

        let source = &self.source;
        run_in_runner(
            source,
            self.runner.clone(),
            ReplicationMode::Master,
            map.use_transaction,
            |runner| async move {
                let listen = map.call_listeners && metadata.is_some();
                if let (true, Some(metadata)) = (listen, &metadata) {
                    source
                        .broadcaster()
                        .broadcast_all(ListenerKind::BeforeInsert, runner.id(), metadata, &mut map.values_set)
                        .await?;
                    bind_values(&mut map)?;
                }

                let sql = compile_insert(&map)?;
                let (sql, params) =
                    escape_query_with_parameters(map.dialect, &sql, &map.parameters, &map.native_parameters)?;
                let result = runner.query(&sql, &params).await?;
                let insert_result = insert_result(&map, metadata.as_deref(), generated, result);

                if let (true, Some(metadata)) = (listen, &metadata) {
                    let mut inserted = map.values_set.clone();
                    insert_result.merge_into(&mut inserted);
                    source
                        .broadcaster()
                        .broadcast_all(ListenerKind::AfterInsert, runner.id(), metadata, &mut inserted)
                        .await?;
                }
                Ok(insert_result)
            },
        )
        .await
    }
}

/// Inserted columns and, per row, the value of each (`None`: database default).
struct InsertShape {
    columns: Vec<String>,
    rows: Vec<Vec<Option<Value>>>,
}

fn parameter_name(row: usize, column: usize) -> String {
    format!("orm_insert_{row}_{column}")
}

fn insert_shape(map: &ExpressionMap) -> OrmResult<InsertShape> {
    let metadata = map.main_alias()?.metadata.clone();
    let Some(metadata) = metadata else {
        // Plain table: the union of keys, in first-seen order.
        let mut columns: Vec<String> = Vec::new();
        for row in &map.values_set {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        let rows = map
            .values_set
            .iter()
            .map(|row| columns.iter().map(|c| row.get(c).map(Value::from_json)).collect())
            .collect();
        return Ok(InsertShape { columns, rows });
    };

    let mut columns = Vec::new();
    let mut cells: Vec<Vec<Option<Value>>> = vec![Vec::new(); map.values_set.len()];
    for column in metadata.insertable_columns() {
        let values: Vec<Option<Value>> = map
            .values_set
            .iter()
            .map(|row| column_value(map, &metadata, column, row))
            .collect();
        if values.iter().all(Option::is_none) {
            continue;
        }
        columns.push(column.database_name.clone());
        for (row, value) in cells.iter_mut().zip(values) {
            row.push(value);
        }
    }
    Ok(InsertShape { columns, rows: cells })
}

fn column_value(
    map: &ExpressionMap,
    metadata: &EntityMetadata,
    column: &ColumnMetadata,
    row: &EntityObject,
) -> Option<Value> {
    if let Some(value) = column.get_entity_value(row) {
        return Some(map.dialect.prepare_persistent_value(column, value));
    }
    if column.is_version {
        return Some(Value::Int(1));
    }
    if column.is_discriminator {
        let value = metadata
            .inheritance
            .as_ref()
            .map(|i| i.discriminator_value.clone())
            .or_else(|| metadata.discriminator_value.clone());
        return value.map(Value::Text);
    }
    None
}

/// Bind every supplied cell under its deterministic name.
fn bind_values(map: &mut ExpressionMap) -> OrmResult<()> {
    if map.values_set.is_empty() || !map.aliases.has_main_alias() {
        return Ok(());
    }
    map.parameters.retain(|name, _| !name.starts_with("orm_insert_"));
    let shape = insert_shape(map)?;
    for (r, row) in shape.rows.into_iter().enumerate() {
        for (c, value) in row.into_iter().enumerate() {
            if let Some(value) = value {
                map.set_parameter(parameter_name(r, c), value);
            }
        }
    }
    Ok(())
}

fn generate_client_values(map: &mut ExpressionMap, metadata: &EntityMetadata, generated: &mut [EntityObject]) {
    if map.dialect.is_uuid_generation_supported() {
        return;
    }
    let columns: Vec<&ColumnMetadata> = metadata
        .columns
        .iter()
        .filter(|c| c.generation == Some(GenerationStrategy::Uuid))
        .collect();
    if columns.is_empty() {
        return;
    }
    for (row, generated) in map.values_set.iter_mut().zip(generated.iter_mut()) {
        for column in &columns {
            if column.get_entity_value(row).is_some_and(|v| !v.is_null()) {
                continue;
            }
            let id = serde_json::Value::String(uuid::Uuid::new_v4().to_string());
            column.set_entity_value(row, id.clone());
            set_path(generated, &column.property_path, id);
        }
    }
    let result = bind_values(map);
    map.record(result);
}

fn insert_result(
    map: &ExpressionMap,
    metadata: Option<&EntityMetadata>,
    mut generated: Vec<EntityObject>,
    result: QueryResult,
) -> InsertResult {
    if !result.records.is_empty() {
        for (generated, row) in generated.iter_mut().zip(&result.records) {
            for (path, value) in generated_map(map, row) {
                generated.insert(path, value);
            }
        }
    } else if let (Some(metadata), Some(insert_id)) = (metadata, result.insert_id.as_ref().and_then(Value::as_i64)) {
        let mut primaries = metadata.primary_columns();
        let increment = match (primaries.next(), primaries.next()) {
            (Some(column), None) if column.generation == Some(GenerationStrategy::Increment) => Some(column),
            _ => None,
        };
        let count = generated.len() as i64;
        if let Some(column) = increment {
            for (i, (generated, row)) in generated.iter_mut().zip(&map.values_set).enumerate() {
                if column.get_entity_value(row).is_some_and(|v| !v.is_null()) {
                    continue;
                }
                let id = match map.dialect.insert_id_strategy() {
                    InsertIdStrategy::FirstOfBatch => insert_id + i as i64,
                    InsertIdStrategy::LastOfBatch => insert_id - (count - 1 - i as i64),
                    InsertIdStrategy::None => continue,
                };
                set_path(generated, &column.property_path, serde_json::Value::from(id));
            }
        }
    }

    let identifiers = match metadata {
        Some(metadata) => map
            .values_set
            .iter()
            .zip(&generated)
            .map(|(row, generated)| {
                let mut merged = row.clone();
                for (path, value) in generated {
                    set_path(&mut merged, path, value.clone());
                }
                metadata.get_entity_id_map(&merged)
            })
            .collect(),
        None => vec![None; map.values_set.len()],
    };

    InsertResult {
        identifiers,
        generated_maps: generated,
        raw: result.raw,
    }
}

/// Compile an INSERT expression map.
pub(crate) fn compile_insert(map: &ExpressionMap) -> OrmResult<String> {
    let dialect = map.dialect;
    if map.values_set.is_empty() {
        return Err(OrmError::InsertValuesMissing);
    }
    let table = main_table(map)?;
    let shape = insert_shape(map)?;
    let returning = returning_columns(map, StatementKind::Insert)?;

    let ignore_keyword = if map.on_ignore { dialect.insert_ignore_keyword() } else { None };
    let mut sql = String::from(ignore_keyword.unwrap_or("INSERT"));
    sql.push_str(" INTO ");
    sql.push_str(&table);

    if shape.columns.is_empty() {
        if shape.rows.len() > 1 {
            return Err(OrmError::usage("cannot insert several rows without any column value"));
        }
        sql.push_str(&output_clause(map, StatementKind::Insert, returning.as_ref()));
        sql.push(' ');
        sql.push_str(dialect.empty_values_clause());
    } else {
        let columns: Vec<String> = shape.columns.iter().map(|c| map.escape(c)).collect();
        sql.push_str(&format!("({})", columns.join(", ")));
        sql.push_str(&output_clause(map, StatementKind::Insert, returning.as_ref()));
        let rows: Vec<String> = shape
            .rows
            .iter()
            .enumerate()
            .map(|(r, row)| {
                let cells: Vec<String> = row
                    .iter()
                    .enumerate()
                    .map(|(c, value)| match value {
                        Some(_) => format!(":{}", parameter_name(r, c)),
                        None => dialect.default_keyword().to_string(),
                    })
                    .collect();
                format!("({})", cells.join(", "))
            })
            .collect();
        sql.push_str(" VALUES ");
        sql.push_str(&rows.join(", "));
    }

    sql.push_str(&conflict_clause(map, &table, ignore_keyword.is_some())?);
    sql.push_str(&returning_clause(map, returning.as_ref()));
    Ok(sql)
}

fn conflict_clause(map: &ExpressionMap, table: &str, ignored_by_keyword: bool) -> OrmResult<String> {
    let dialect = map.dialect;
    let unsupported = |feature: &str| OrmError::unsupported(dialect.name(), feature.to_string());
    let metadata = map.main_alias()?.metadata.clone();
    let column_names = |paths: &[String]| -> Vec<String> {
        paths
            .iter()
            .flat_map(|path| {
                let found: Vec<String> = metadata
                    .as_ref()
                    .map(|m| {
                        m.find_columns_with_property_path(path)
                            .into_iter()
                            .map(|c| c.database_name.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                if found.is_empty() { vec![path.clone()] } else { found }
            })
            .collect()
    };

    if let Some(statement) = &map.on_conflict {
        return match dialect.upsert_style() {
            UpsertStyle::OnConflict => Ok(format!(" ON CONFLICT {statement}")),
            _ => Err(unsupported("ON CONFLICT")),
        };
    }

    if let Some(on_update) = &map.on_update {
        let columns = column_names(&on_update.columns);
        return match dialect.upsert_style() {
            UpsertStyle::OnConflict => {
                let target = column_names(&on_update.conflict_target);
                let mut sql = String::from(" ON CONFLICT");
                if !target.is_empty() {
                    let target: Vec<String> = target.iter().map(|c| map.escape(c)).collect();
                    sql.push_str(&format!(" ( {} )", target.join(", ")));
                }
                let sets: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{} = EXCLUDED.{}", map.escape(c), map.escape(c)))
                    .collect();
                sql.push_str(" DO UPDATE SET ");
                sql.push_str(&sets.join(", "));
                if on_update.skip_update_if_no_values_changed && !columns.is_empty() {
                    let changed = columns
                        .iter()
                        .map(|c| {
                            dialect.distinct_from(
                                &format!("{table}.{}", map.escape(c)),
                                &format!("EXCLUDED.{}", map.escape(c)),
                            )
                        })
                        .collect::<OrmResult<Vec<_>>>()?;
                    sql.push_str(&format!(" WHERE ({})", changed.join(" OR ")));
                }
                Ok(sql)
            }
            UpsertStyle::OnDuplicateKey => {
                let sets: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{} = VALUES({})", map.escape(c), map.escape(c)))
                    .collect();
                Ok(format!(" ON DUPLICATE KEY UPDATE {}", sets.join(", ")))
            }
            UpsertStyle::Unsupported => Err(unsupported("upsert")),
        };
    }

    if map.on_ignore && !ignored_by_keyword {
        return match dialect.upsert_style() {
            UpsertStyle::OnConflict => Ok(" ON CONFLICT DO NOTHING".to_string()),
            _ => Err(unsupported("INSERT ... ignoring conflicts")),
        };
    }
    Ok(String::new())
}
