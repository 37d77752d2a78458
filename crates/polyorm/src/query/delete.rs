use std::sync::Arc;

use super::alias::AliasType;
use super::execution::{WriteStatement, execute_write};
use super::expression_map::{ExpressionMap, Order, OrderBy, Returning};
use super::results::DeleteResult;
use super::update::where_entity;
use super::where_builder::WhereExpressionBuilder;
use super::{
    QueryBuilder, QueryKind, compile_where, main_table, output_clause, register_main_alias, returning_clause,
    returning_columns, write_limit_clause,
};
use crate::connection::DataSource;
use crate::dialect::StatementKind;
use crate::error::OrmResult;
use crate::metadata::EntityObject;
use crate::runner::{ListenerKind, QueryRunner};

/// DELETE builder.
#[derive(Debug, Clone)]
pub struct DeleteQueryBuilder {
    source: DataSource,
    runner: Option<QueryRunner>,
    map: ExpressionMap,
}

impl QueryBuilder for DeleteQueryBuilder {
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
        compile_delete(&self.map)
    }
}

impl WhereExpressionBuilder for DeleteQueryBuilder {
    fn expression_map_mut(&mut self) -> &mut ExpressionMap {
        &mut self.map
    }
}

impl DeleteQueryBuilder {
    pub(crate) fn new(source: DataSource, runner: Option<QueryRunner>) -> Self {
        let map = ExpressionMap::new(source.dialect(), QueryKind::Delete);
        Self { source, runner, map }
    }

    pub(crate) fn from_parts(source: DataSource, runner: Option<QueryRunner>, map: ExpressionMap) -> Self {
        Self { source, runner, map }
    }

    /// Entity or table to delete from.
    pub fn from(&mut self, target: &str) -> &mut Self {
        self.map.aliases.remove_kind(AliasType::From);
        let registry = Arc::clone(self.source.registry());
        let result = register_main_alias(&mut self.map, &registry, target, None);
        self.map.record(result);
        self
    }

    /// Restrict the delete to these entities, by primary key.
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

    pub async fn execute(&self) -> OrmResult<DeleteResult> {
        let statement = WriteStatement {
            listeners: Some((ListenerKind::BeforeRemove, ListenerKind::AfterRemove)),
            compile: compile_delete,
            rebind: None,
        };
        let result = execute_write(&self.source, self.runner.clone(), self.map.clone(), statement).await?;
        Ok(DeleteResult {
            raw: result.raw,
            affected: result.affected,
        })
    }
}

pub(crate) fn compile_delete(map: &ExpressionMap) -> OrmResult<String> {
    let returning = returning_columns(map, StatementKind::Delete)?;
    Ok(format!(
        "DELETE FROM {}{}{}{}{}",
        main_table(map)?,
        output_clause(map, StatementKind::Delete, returning.as_ref()),
        compile_where(map, false)?,
        write_limit_clause(map)?,
        returning_clause(map, returning.as_ref())
    ))
}
