use super::execution::{WriteStatement, execute_write};
use super::expression_map::{ExpressionMap, Order, OrderBy, Returning};
use super::results::UpdateResult;
use super::update::{automatic_assignments, compile_update_statement, where_entity};
use super::where_builder::WhereExpressionBuilder;
use super::{QueryBuilder, QueryKind, generated_map};
use crate::connection::DataSource;
use crate::error::{OrmError, OrmResult};
use crate::metadata::EntityObject;
use crate::runner::{ListenerKind, QueryRunner};

/// Soft delete (stamp the delete-date column) or restore (clear it).
///
/// Which of the two is decided by how the builder was created:
/// [`SelectQueryBuilder::soft_delete`](super::SelectQueryBuilder::soft_delete) or
/// [`SelectQueryBuilder::restore`](super::SelectQueryBuilder::restore).
#[derive(Debug, Clone)]
pub struct SoftDeleteQueryBuilder {
    source: DataSource,
    runner: Option<QueryRunner>,
    map: ExpressionMap,
}

impl QueryBuilder for SoftDeleteQueryBuilder {
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
        compile_soft_delete(&self.map)
    }
}

impl WhereExpressionBuilder for SoftDeleteQueryBuilder {
    fn expression_map_mut(&mut self) -> &mut ExpressionMap {
        &mut self.map
    }
}

impl SoftDeleteQueryBuilder {
    pub(crate) fn from_parts(source: DataSource, runner: Option<QueryRunner>, map: ExpressionMap) -> Self {
        Self { source, runner, map }
    }

    pub fn is_restore(&self) -> bool {
        self.map.query_kind == QueryKind::Restore
    }

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
        let listeners = if self.is_restore() {
            (ListenerKind::BeforeRecover, ListenerKind::AfterRecover)
        } else {
            (ListenerKind::BeforeSoftRemove, ListenerKind::AfterSoftRemove)
        };
        let statement = WriteStatement {
            listeners: Some(listeners),
            compile: compile_soft_delete,
            rebind: None,
        };
        let result = execute_write(&self.source, self.runner.clone(), self.map.clone(), statement).await?;
        Ok(UpdateResult {
            generated_maps: result.records.iter().map(|row| generated_map(&self.map, row)).collect(),
            affected: result.affected,
            raw: result.raw,
        })
    }
}

pub(crate) fn compile_soft_delete(map: &ExpressionMap) -> OrmResult<String> {
    let main = map.main_alias()?;
    let metadata = main.metadata()?;
    let column = metadata
        .delete_date_column()
        .ok_or_else(|| OrmError::MissingDeleteDateColumn(metadata.name.clone()))?;

    let stamp = if map.query_kind == QueryKind::Restore {
        "NULL".to_string()
    } else {
        map.dialect.current_timestamp().to_string()
    };
    let assigned = vec![(column.database_name.clone(), stamp)];
    let mut sets: Vec<String> = assigned
        .iter()
        .map(|(column, sql)| format!("{} = {sql}", map.escape(column)))
        .collect();
    sets.extend(automatic_assignments(map, &assigned));
    compile_update_statement(map, &sets)
}
