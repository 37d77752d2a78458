//! SELECT builder and its execution.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_core::Stream;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;

use super::alias::{AliasDescriptor, AliasType};
use super::condition::{RawCondition, RenderContext, WhereClause, WhereInput, WhereKind, render_clauses};
use super::execution::run_in_runner;
use super::expression_map::{
    ExpressionMap, JoinAttribute, JoinDirection, JoinMapping, JoinTarget, LockVersion, Nulls, Order, OrderBy,
    RelationCountAttribute, RelationIdAttribute, SelectItem,
};
use super::replace::replace_property_names;
use super::where_builder::{WhereExpressionBuilder, lower_condition};
use super::{
    DeleteQueryBuilder, InsertQueryBuilder, QueryBuilder, QueryKind, RelationQueryBuilder, SoftDeleteQueryBuilder,
    UpdateQueryBuilder, compile_where, register_from_alias, register_main_alias,
};
use crate::cache::cache_key;
use crate::connection::DataSource;
use crate::dialect::{LockClause, LockMode, OnLocked, escape_query_with_parameters};
use crate::driver::{ReplicationMode, RowStream};
use crate::error::{OrmError, OrmResult};
use crate::hydration::{RawSqlResultsToEntityTransformer, RelationCountLoader, RelationIdLoader, column_name};
use crate::metadata::{EntityMetadata, EntityObject, MetadataRegistry, get_path, set_path};
use crate::row::Row;
use crate::runner::{ListenerKind, QueryRunner};
use crate::value::Value;

/// Builds and runs SELECT statements.
///
/// ```ignore
/// let (users, total) = source
///     .query_builder("User", "user")
///     .left_join_and_select("user.photos", "photo")
///     .where_("user.firstName = :name")
///     .set_parameter("name", "Timber")
///     .skip(20)
///     .take(10)
///     .get_many_and_count()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct SelectQueryBuilder {
    pub(crate) source: DataSource,
    runner: Option<QueryRunner>,
    pub(crate) map: ExpressionMap,
}

impl QueryBuilder for SelectQueryBuilder {
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
        let sql = compile_select(&self.map, self.source.registry())?;
        Ok(if self.map.sub_query { format!("({sql})") } else { sql })
    }
}

impl WhereExpressionBuilder for SelectQueryBuilder {
    fn expression_map_mut(&mut self) -> &mut ExpressionMap {
        &mut self.map
    }
}

impl SelectQueryBuilder {
    pub(crate) fn new(source: DataSource, runner: Option<QueryRunner>) -> Self {
        let mut map = ExpressionMap::new(source.dialect(), QueryKind::Select);
        map.cache = source.options().cache.as_ref().is_some_and(|c| c.always_enabled);
        Self { source, runner, map }
    }

    pub(crate) fn from_parts(source: DataSource, runner: Option<QueryRunner>, map: ExpressionMap) -> Self {
        Self { source, runner, map }
    }

    // ==================== Selection ====================

    /// Replace the select list.
    ///
    /// An alias name selects every column of that alias; `alias.property`
    /// selects one column (primary keys are always added); anything else is
    /// emitted as a raw expression.
    pub fn select<I, S>(&mut self, selections: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.map.selects.clear();
        for selection in selections {
            self.add_select(selection);
        }
        self
    }

    pub fn add_select(&mut self, selection: impl Into<String>) -> &mut Self {
        self.map.selects.push(SelectItem {
            selection: selection.into(),
            alias_name: None,
        });
        self
    }

    /// Add a raw expression under a result column name.
    pub fn add_select_as(&mut self, selection: impl Into<String>, alias: impl Into<String>) -> &mut Self {
        self.map.selects.push(SelectItem {
            selection: selection.into(),
            alias_name: Some(alias.into()),
        });
        self
    }

    pub fn distinct(&mut self, distinct: bool) -> &mut Self {
        self.map.distinct = distinct;
        self
    }

    /// Set the main source: an entity name, or a table path when no entity matches.
    pub fn from(&mut self, target: &str, alias: &str) -> &mut Self {
        let registry = Arc::clone(self.source.registry());
        let result = register_main_alias(&mut self.map, &registry, target, Some(alias));
        self.map.record(result);
        self
    }

    /// Add another FROM source next to the main one.
    pub fn add_from(&mut self, target: &str, alias: &str) -> &mut Self {
        let registry = Arc::clone(self.source.registry());
        let result = register_from_alias(&mut self.map, &registry, target, Some(alias));
        if let Some(name) = self.map.record(result) {
            if !self.map.aliases.has_main_alias() {
                let result = self.map.aliases.set_main_alias(&name);
                self.map.record(result);
            }
        }
        self
    }

    /// Select from a subquery built by `build`.
    pub fn from_sub_query<F>(&mut self, build: F, alias: &str) -> &mut Self
    where
        F: FnOnce(&mut SelectQueryBuilder),
    {
        let result = self.build_sub_query(build).and_then(|sql| {
            let descriptor = AliasDescriptor::new(AliasType::From).named(alias).sub_query(sql);
            let name = self.map.aliases.create_alias(descriptor)?.name.clone();
            if !self.map.aliases.has_main_alias() {
                self.map.aliases.set_main_alias(&name)?;
            }
            Ok(())
        });
        self.map.record(result);
        self
    }

    /// A child builder whose SQL compiles wrapped in parentheses.
    ///
    /// Its parameter names never collide with this builder's, so its
    /// parameters can be merged back with `set_parameters(sub.get_parameters())`.
    pub fn sub_query(&self) -> SelectQueryBuilder {
        Self::from_parts(self.source.clone(), None, self.map.derive_sub_query())
    }

    fn build_sub_query<F>(&mut self, build: F) -> OrmResult<String>
    where
        F: FnOnce(&mut SelectQueryBuilder),
    {
        let mut sub = self.sub_query();
        build(&mut sub);
        let sql = sub.get_query()?;
        self.map.merge_parameters(sub.map.parameters);
        Ok(sql)
    }

    // ==================== Joins ====================

    /// Join a relation (`alias.property`), an entity or a table without selecting it.
    pub fn inner_join(&mut self, target: &str, alias: &str) -> &mut Self {
        self.join(JoinDirection::Inner, target, alias, None, false, None)
    }

    pub fn left_join(&mut self, target: &str, alias: &str) -> &mut Self {
        self.join(JoinDirection::Left, target, alias, None, false, None)
    }

    pub fn inner_join_and_select(&mut self, target: &str, alias: &str) -> &mut Self {
        self.join(JoinDirection::Inner, target, alias, None, true, None)
    }

    pub fn left_join_and_select(&mut self, target: &str, alias: &str) -> &mut Self {
        self.join(JoinDirection::Left, target, alias, None, true, None)
    }

    /// Join with a condition. For relations it is ANDed to the key condition.
    pub fn inner_join_on(&mut self, target: &str, alias: &str, condition: impl Into<RawCondition>) -> &mut Self {
        self.join(JoinDirection::Inner, target, alias, Some(condition.into()), false, None)
    }

    pub fn left_join_on(&mut self, target: &str, alias: &str, condition: impl Into<RawCondition>) -> &mut Self {
        self.join(JoinDirection::Left, target, alias, Some(condition.into()), false, None)
    }

    pub fn inner_join_and_select_on(
        &mut self,
        target: &str,
        alias: &str,
        condition: impl Into<RawCondition>,
    ) -> &mut Self {
        self.join(JoinDirection::Inner, target, alias, Some(condition.into()), true, None)
    }

    pub fn left_join_and_select_on(
        &mut self,
        target: &str,
        alias: &str,
        condition: impl Into<RawCondition>,
    ) -> &mut Self {
        self.join(JoinDirection::Left, target, alias, Some(condition.into()), true, None)
    }

    /// Join and hydrate the first match into `map_to` (`parentAlias.property`).
    pub fn inner_join_and_map_one(
        &mut self,
        map_to: &str,
        target: &str,
        alias: &str,
        condition: Option<RawCondition>,
    ) -> &mut Self {
        self.join(JoinDirection::Inner, target, alias, condition, true, Some((map_to, false)))
    }

    pub fn left_join_and_map_one(
        &mut self,
        map_to: &str,
        target: &str,
        alias: &str,
        condition: Option<RawCondition>,
    ) -> &mut Self {
        self.join(JoinDirection::Left, target, alias, condition, true, Some((map_to, false)))
    }

    /// Join and hydrate every match into `map_to` as an array.
    pub fn inner_join_and_map_many(
        &mut self,
        map_to: &str,
        target: &str,
        alias: &str,
        condition: Option<RawCondition>,
    ) -> &mut Self {
        self.join(JoinDirection::Inner, target, alias, condition, true, Some((map_to, true)))
    }

    pub fn left_join_and_map_many(
        &mut self,
        map_to: &str,
        target: &str,
        alias: &str,
        condition: Option<RawCondition>,
    ) -> &mut Self {
        self.join(JoinDirection::Left, target, alias, condition, true, Some((map_to, true)))
    }

    /// LEFT JOIN a subquery built by `build`.
    pub fn left_join_sub_query<F>(&mut self, build: F, alias: &str, condition: impl Into<RawCondition>) -> &mut Self
    where
        F: FnOnce(&mut SelectQueryBuilder),
    {
        let condition = condition.into();
        let result = self.build_sub_query(build).and_then(|sql| {
            let condition = lower_condition(&mut self.map, WhereInput::Raw(condition))?;
            let descriptor = AliasDescriptor::new(AliasType::Join).named(alias).sub_query(sql.clone());
            let name = self.map.aliases.create_alias(descriptor)?.name.clone();
            self.map.joins.push(JoinAttribute {
                direction: JoinDirection::Left,
                target: JoinTarget::SubQuery(sql),
                alias: name,
                condition: Some(condition),
                selected: false,
                map_to: None,
            });
            Ok(())
        });
        self.map.record(result);
        self
    }

    fn join(
        &mut self,
        direction: JoinDirection,
        target: &str,
        alias: &str,
        condition: Option<RawCondition>,
        selected: bool,
        map_to: Option<(&str, bool)>,
    ) -> &mut Self {
        let result = self.try_join(direction, target, alias, condition, selected, map_to);
        self.map.record(result);
        self
    }

    fn try_join(
        &mut self,
        direction: JoinDirection,
        target: &str,
        alias: &str,
        condition: Option<RawCondition>,
        selected: bool,
        map_to: Option<(&str, bool)>,
    ) -> OrmResult<()> {
        let registry = Arc::clone(self.source.registry());
        let descriptor = AliasDescriptor::new(AliasType::Join).named(alias);

        let relation_target = target.split_once('.').and_then(|(parent, property)| {
            let parent_alias = self.map.aliases.find(parent)?;
            let metadata = parent_alias.metadata.as_ref()?;
            Some((parent.to_string(), property.to_string(), Arc::clone(metadata)))
        });
        let (join_target, descriptor) = match relation_target {
            Some((parent_alias, property, metadata)) => {
                let relation = metadata.find_relation(&property).cloned().ok_or_else(|| {
                    OrmError::usage(format!(
                        "relation with property path \"{property}\" was not found in entity {}",
                        metadata.name
                    ))
                })?;
                let target_metadata = registry.get(&relation.target)?;
                (
                    JoinTarget::Relation { parent_alias, relation },
                    descriptor.entity(target_metadata),
                )
            }
            None => match registry.find(target) {
                Some(metadata) => (JoinTarget::Entity(metadata.name.clone()), descriptor.entity(metadata)),
                None => (JoinTarget::Table(target.to_string()), descriptor.table(target)),
            },
        };

        let map_to = match map_to {
            Some((path, many)) => {
                let (parent_alias, property) = path.split_once('.').ok_or_else(|| {
                    OrmError::usage(format!("join mapping \"{path}\" must have the form alias.property"))
                })?;
                self.map.aliases.get(parent_alias)?;
                Some(JoinMapping {
                    parent_alias: parent_alias.to_string(),
                    property: property.to_string(),
                    many,
                })
            }
            None => None,
        };

        let name = self.map.aliases.create_alias(descriptor)?.name.clone();
        let condition = condition
            .map(|raw| lower_condition(&mut self.map, WhereInput::Raw(raw)))
            .transpose()?;
        if selected {
            self.add_select(name.clone());
        }
        self.map.joins.push(JoinAttribute {
            direction,
            target: join_target,
            alias: name,
            condition,
            selected,
            map_to,
        });
        Ok(())
    }

    // ==================== Grouping and ordering ====================

    /// Replace all HAVING conditions.
    pub fn having<'a>(&mut self, input: impl Into<WhereInput<'a>>) -> &mut Self {
        self.map.havings.clear();
        self.push_having(WhereKind::Simple, input.into())
    }

    pub fn and_having<'a>(&mut self, input: impl Into<WhereInput<'a>>) -> &mut Self {
        self.push_having(WhereKind::And, input.into())
    }

    pub fn or_having<'a>(&mut self, input: impl Into<WhereInput<'a>>) -> &mut Self {
        self.push_having(WhereKind::Or, input.into())
    }

    fn push_having(&mut self, kind: WhereKind, input: WhereInput<'_>) -> &mut Self {
        let lowered = lower_condition(&mut self.map, input);
        if let Some(condition) = self.map.record(lowered) {
            self.map.havings.push(WhereClause { kind, condition });
        }
        self
    }

    pub fn group_by(&mut self, expression: impl Into<String>) -> &mut Self {
        self.map.group_bys = vec![expression.into()];
        self
    }

    pub fn add_group_by(&mut self, expression: impl Into<String>) -> &mut Self {
        self.map.group_bys.push(expression.into());
        self
    }

    /// Replace the ordering.
    pub fn order_by(&mut self, expression: impl Into<String>, order: Order) -> &mut Self {
        self.map.order_bys.clear();
        self.add_order_by(expression, order)
    }

    pub fn add_order_by(&mut self, expression: impl Into<String>, order: Order) -> &mut Self {
        self.map.order_bys.push(OrderBy {
            expression: expression.into(),
            order,
            nulls: None,
        });
        self
    }

    pub fn add_order_by_nulls(&mut self, expression: impl Into<String>, order: Order, nulls: Nulls) -> &mut Self {
        self.map.order_bys.push(OrderBy {
            expression: expression.into(),
            order,
            nulls: Some(nulls),
        });
        self
    }

    // ==================== Pagination ====================

    /// Raw LIMIT. With joins it limits joined rows, not entities; see [`Self::take`].
    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.map.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.map.offset = Some(offset);
        self
    }

    /// Entities to skip. With joins, pagination runs on distinct main-alias ids.
    pub fn skip(&mut self, skip: u64) -> &mut Self {
        self.map.skip = Some(skip);
        self
    }

    /// Entities to return. With joins, pagination runs on distinct main-alias ids.
    pub fn take(&mut self, take: u64) -> &mut Self {
        self.map.take = Some(take);
        self
    }

    // ==================== Locking ====================

    /// Pessimistic locks need an active transaction at execution time.
    pub fn set_lock(&mut self, mode: LockMode) -> &mut Self {
        self.map.lock_mode = Some(mode);
        self
    }

    /// Fail unless the loaded entity still has this version or update date.
    pub fn set_optimistic_lock(&mut self, version: LockVersion) -> &mut Self {
        self.map.lock_mode = Some(LockMode::Optimistic);
        self.map.lock_version = Some(version);
        self
    }

    pub fn set_on_locked(&mut self, on_locked: OnLocked) -> &mut Self {
        self.map.on_locked = Some(on_locked);
        self
    }

    /// Restrict a pessimistic lock to these aliases (`FOR UPDATE OF ...`).
    pub fn set_lock_tables<I, S>(&mut self, aliases: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.map.lock_tables = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Include soft-deleted rows.
    pub fn with_deleted(&mut self) -> &mut Self {
        self.map.with_deleted = true;
        self
    }

    // ==================== Caching ====================

    pub fn cache(&mut self, enabled: bool) -> &mut Self {
        self.map.cache = enabled;
        self
    }

    pub fn cache_for(&mut self, duration: Duration) -> &mut Self {
        self.map.cache = true;
        self.map.cache_duration = Some(duration);
        self
    }

    /// Cache under an explicit key, so it can be invalidated by name.
    pub fn cache_with_id(&mut self, id: impl Into<String>, duration: Duration) -> &mut Self {
        self.map.cache = true;
        self.map.cache_id = Some(id.into());
        self.map.cache_duration = Some(duration);
        self
    }

    // ==================== Relation ids and counts ====================

    /// Load the ids of `relation` (`alias.property`) into `map_to` (`alias.property`).
    pub fn load_relation_id_and_map(&mut self, map_to: &str, relation: &str) -> &mut Self {
        let result = self.resolve_relation_attribute(map_to, relation);
        if let Some((parent_alias, relation, map_to)) = self.map.record(result) {
            self.map.relation_id_attributes.push(RelationIdAttribute {
                parent_alias,
                relation,
                map_to,
            });
        }
        self
    }

    /// Count the related records of `relation` into `map_to`.
    pub fn load_relation_count_and_map(&mut self, map_to: &str, relation: &str) -> &mut Self {
        let result = self.resolve_relation_attribute(map_to, relation);
        if let Some((parent_alias, relation, map_to)) = self.map.record(result) {
            self.map.relation_count_attributes.push(RelationCountAttribute {
                parent_alias,
                relation,
                map_to,
            });
        }
        self
    }

    fn resolve_relation_attribute(
        &self,
        map_to: &str,
        relation: &str,
    ) -> OrmResult<(String, crate::metadata::RelationMetadata, String)> {
        let (parent_alias, property) = relation
            .split_once('.')
            .ok_or_else(|| OrmError::usage(format!("relation \"{relation}\" must have the form alias.property")))?;
        let metadata = self.map.aliases.get(parent_alias)?.metadata()?;
        let relation = metadata.find_relation(property).cloned().ok_or_else(|| {
            OrmError::usage(format!(
                "relation with property path \"{property}\" was not found in entity {}",
                metadata.name
            ))
        })?;
        let target = match map_to.split_once('.') {
            Some((alias, target)) if alias == parent_alias => target.to_string(),
            Some(_) => {
                return Err(OrmError::usage(format!(
                    "\"{map_to}\" must be a property of alias \"{parent_alias}\""
                )));
            }
            None => map_to.to_string(),
        };
        Ok((parent_alias.to_string(), relation, target))
    }

    // ==================== Conversions ====================

    /// INSERT builder sharing this builder's data source and runner.
    pub fn insert(&self) -> InsertQueryBuilder {
        let mut map = self.map.clone();
        map.query_kind = QueryKind::Insert;
        InsertQueryBuilder::from_parts(self.source.clone(), self.runner.clone(), map)
    }

    /// UPDATE builder for the main alias.
    pub fn update(&self, values: EntityObject) -> UpdateQueryBuilder {
        let mut map = self.map.clone();
        map.query_kind = QueryKind::Update;
        let mut builder = UpdateQueryBuilder::from_parts(self.source.clone(), self.runner.clone(), map);
        builder.set(values);
        builder
    }

    /// DELETE builder for the main alias.
    pub fn delete(&self) -> DeleteQueryBuilder {
        let mut map = self.map.clone();
        map.query_kind = QueryKind::Delete;
        DeleteQueryBuilder::from_parts(self.source.clone(), self.runner.clone(), map)
    }

    /// Soft-delete builder for the main alias.
    pub fn soft_delete(&self) -> SoftDeleteQueryBuilder {
        let mut map = self.map.clone();
        map.query_kind = QueryKind::SoftDelete;
        SoftDeleteQueryBuilder::from_parts(self.source.clone(), self.runner.clone(), map)
    }

    /// Restore builder (clears the delete date) for the main alias.
    pub fn restore(&self) -> SoftDeleteQueryBuilder {
        let mut map = self.map.clone();
        map.query_kind = QueryKind::Restore;
        SoftDeleteQueryBuilder::from_parts(self.source.clone(), self.runner.clone(), map)
    }

    /// Relation builder for `property` of the main alias' entity.
    pub fn relation(&self, property: &str) -> RelationQueryBuilder {
        let mut map = self.map.clone();
        map.query_kind = QueryKind::Relation;
        map.relation_property_path = Some(property.to_string());
        RelationQueryBuilder::from_parts(self.source.clone(), self.runner.clone(), map)
    }

    // ==================== Execution ====================

    /// Result rows exactly as the driver returned them.
    pub async fn get_raw_many(&self) -> OrmResult<Vec<Row>> {
        self.map.check()?;
        run_in_runner(
            &self.source,
            self.runner.clone(),
            ReplicationMode::Slave,
            self.map.use_transaction,
            |runner| async move { self.execute_raw(&runner).await },
        )
        .await
    }

    pub async fn get_raw_one(&self) -> OrmResult<Option<Row>> {
        Ok(self.get_raw_many().await?.into_iter().next())
    }

    /// Raw rows together with the entities hydrated from them.
    pub async fn get_raw_and_entities(&self) -> OrmResult<(Vec<Row>, Vec<EntityObject>)> {
        self.map.check()?;
        run_in_runner(
            &self.source,
            self.runner.clone(),
            ReplicationMode::Slave,
            self.map.use_transaction,
            |runner| async move {
                let rows = self.execute_raw(&runner).await?;
                let entities = self.hydrate(&runner, &rows).await?;
                Ok((rows, entities))
            },
        )
        .await
    }

    pub async fn get_many(&self) -> OrmResult<Vec<EntityObject>> {
        Ok(self.get_raw_and_entities().await?.1)
    }

    pub async fn get_one(&self) -> OrmResult<Option<EntityObject>> {
        Ok(self.get_many().await?.into_iter().next())
    }

    pub async fn get_one_or_fail(&self) -> OrmResult<EntityObject> {
        match self.get_one().await? {
            Some(entity) => Ok(entity),
            None => {
                let target = self
                    .map
                    .main_alias()
                    .ok()
                    .and_then(|a| a.metadata.as_ref().map(|m| m.name.clone()))
                    .unwrap_or_default();
                Err(OrmError::not_found(format!(
                    "could not find any entity of type \"{target}\" matching the query"
                )))
            }
        }
    }

    /// Entities deserialized into `T`.
    pub async fn get_many_as<T: DeserializeOwned>(&self) -> OrmResult<Vec<T>> {
        self.get_many()
            .await?
            .into_iter()
            .map(|entity| Ok(serde_json::from_value(serde_json::Value::Object(entity))?))
            .collect()
    }

    pub async fn get_one_as<T: DeserializeOwned>(&self) -> OrmResult<Option<T>> {
        self.get_one()
            .await?
            .map(|entity| Ok(serde_json::from_value(serde_json::Value::Object(entity))?))
            .transpose()
    }

    /// Number of distinct main-alias entities matching, ignoring ordering and pagination.
    pub async fn get_count(&self) -> OrmResult<u64> {
        self.map.check()?;
        run_in_runner(
            &self.source,
            self.runner.clone(),
            ReplicationMode::Slave,
            self.map.use_transaction,
            |runner| async move { self.execute_count(&runner).await },
        )
        .await
    }

    /// One page of entities plus the total count, on one runner.
    pub async fn get_many_and_count(&self) -> OrmResult<(Vec<EntityObject>, u64)> {
        self.map.check()?;
        run_in_runner(
            &self.source,
            self.runner.clone(),
            ReplicationMode::Slave,
            self.map.use_transaction,
            |runner| async move {
                let rows = self.execute_raw(&runner).await?;
                let entities = self.hydrate(&runner, &rows).await?;
                let count = self.execute_count(&runner).await?;
                Ok((entities, count))
            },
        )
        .await
    }

    /// Whether any row matches.
    pub async fn get_exists(&self) -> OrmResult<bool> {
        self.map.check()?;
        let sql = self.exists_sql()?;
        let (sql, params) =
            escape_query_with_parameters(self.map.dialect, &sql, &self.map.parameters, &self.map.native_parameters)?;
        run_in_runner(
            &self.source,
            self.runner.clone(),
            ReplicationMode::Slave,
            self.map.use_transaction,
            |runner| async move {
                self.check_lock_transaction(&runner)?;
                let rows = self.query_cached(&runner, &self.map, &sql, &params).await?;
                Ok(!rows.is_empty())
            },
        )
        .await
    }

    /// Stream raw rows. An owned runner is released when the stream is dropped.
    pub async fn stream(&self) -> OrmResult<SelectStream> {
        self.map.check()?;
        let sql = self.build_query()?;
        let (sql, params) =
            escape_query_with_parameters(self.map.dialect, &sql, &self.map.parameters, &self.map.native_parameters)?;

        let owned = self.runner.is_none();
        let runner = self
            .runner
            .clone()
            .unwrap_or_else(|| self.source.create_query_runner(ReplicationMode::Slave));
        let result = match self.check_lock_transaction(&runner) {
            Ok(()) => runner.stream(&sql, &params).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(rows) => Ok(SelectStream {
                rows,
                runner: owned.then_some(runner),
            }),
            Err(err) => {
                if owned {
                    if let Err(release) = runner.release().await {
                        tracing::warn!(target: "polyorm.runner", runner = runner.id(), error = %release, "releasing query runner failed");
                    }
                }
                Err(err)
            }
        }
    }

    fn exists_sql(&self) -> OrmResult<String> {
        let dialect = self.map.dialect;
        let inner = compile_select(&self.map, self.source.registry())?;
        let dual = dialect.dual_table().map(|t| format!(" FROM {t}")).unwrap_or_default();
        Ok(format!(
            "SELECT 1 AS {} FROM (SELECT 1 AS {}{dual}) {} WHERE EXISTS ({inner}){}",
            self.map.escape("row_exists"),
            self.map.escape("dummy_column"),
            self.map.escape("dummy_table"),
            dialect.pagination_clause(Some(1), None, false)?
        ))
    }

    fn check_lock_transaction(&self, runner: &QueryRunner) -> OrmResult<()> {
        match self.map.lock_mode {
            Some(mode) if mode.is_pessimistic() && !runner.is_transaction_active() => {
                Err(OrmError::PessimisticLockTransactionRequired)
            }
            _ => Ok(()),
        }
    }

    async fn execute_raw(&self, runner: &QueryRunner) -> OrmResult<Vec<Row>> {
        self.check_lock_transaction(runner)?;
        if self.map.needs_two_phase_pagination() {
            return self.execute_paginated(runner).await;
        }
        self.load_raw(runner, &self.map).await
    }

    async fn load_raw(&self, runner: &QueryRunner, map: &ExpressionMap) -> OrmResult<Vec<Row>> {
        let sql = compile_select(map, self.source.registry())?;
        let (sql, params) = escape_query_with_parameters(map.dialect, &sql, &map.parameters, &map.native_parameters)?;
        self.query_cached(runner, map, &sql, &params).await
    }

    async fn query_cached(
        &self,
        runner: &QueryRunner,
        map: &ExpressionMap,
        sql: &str,
        params: &[Value],
    ) -> OrmResult<Vec<Row>> {
        let cache = if map.cache { self.source.result_cache() } else { None };
        let Some(cache) = cache else {
            return Ok(runner.query(sql, params).await?.records);
        };

        let key = map.cache_id.clone().unwrap_or_else(|| cache_key(sql, params));
        let previous = cache.get_from_cache(&key).await?;
        if let Some(entry) = &previous {
            if !cache.is_expired(entry) {
                tracing::debug!(target: "polyorm.cache", key = %key, "result cache hit");
                return entry.rows();
            }
        }

        let rows = runner.query(sql, params).await?.records;
        let duration = map
            .cache_duration
            .or_else(|| self.source.options().cache.as_ref().map(|c| c.duration))
            .unwrap_or(Duration::from_millis(1000));
        cache
            .store_in_cache(&key, previous.as_ref(), serde_json::to_value(&rows)?, duration)
            .await?;
        Ok(rows)
    }

    /// Skip/take over joined rows: first select the distinct ids of one page,
    /// then load the full rows of exactly those ids.
    async fn execute_paginated(&self, runner: &QueryRunner) -> OrmResult<Vec<Row>> {
        let dialect = self.map.dialect;
        let main = self.map.main_alias()?;
        let alias = main.name.clone();
        let metadata = Arc::clone(main.metadata()?);

        let mut inner = self.map.clone();
        inner.skip = None;
        inner.take = None;
        inner.order_bys.clear();
        inner.lock_mode = None;
        let inner_sql = compile_select(&inner, self.source.registry())?;

        let distinct_alias = self.map.escape("distinctAlias");
        let column_of = |name: &str| format!("{distinct_alias}.{}", self.map.escape(name));
        let primaries: Vec<String> = metadata
            .primary_columns()
            .map(|c| dialect.build_column_alias(&alias, &c.database_name))
            .collect();

        let mut selects: Vec<String> = primaries
            .iter()
            .map(|column| format!("{} AS {}", column_of(column), self.map.escape(&format!("ids_{column}"))))
            .collect();
        let mut orders = Vec::new();
        for order in &self.map.order_bys {
            let expression = match self.selected_column_alias(&order.expression) {
                Some(column) => {
                    let expression = column_of(&column);
                    if !primaries.contains(&column) {
                        selects.push(expression.clone());
                    }
                    expression
                }
                None => order.expression.clone(),
            };
            orders.push(format_order(&expression, order.order, order.nulls));
        }
        for column in &primaries {
            let expression = column_of(column);
            if !orders.iter().any(|o| o.starts_with(&format!("{expression} "))) {
                orders.push(format!("{expression} ASC"));
            }
        }

        let sql = format!(
            "SELECT DISTINCT {} FROM ({inner_sql}) {distinct_alias} ORDER BY {}{}",
            selects.join(", "),
            orders.join(", "),
            dialect.pagination_clause(self.map.take, self.map.skip, true)?
        );
        let (sql, params) =
            escape_query_with_parameters(dialect, &sql, &inner.parameters, &inner.native_parameters)?;
        let id_rows = runner.query(&sql, &params).await?.records;
        if id_rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut outer = self.map.clone();
        outer.skip = None;
        outer.take = None;
        let key_columns: Vec<_> = metadata.primary_columns().cloned().collect();
        let column_ref = |db: &str| format!("{}.{}", self.map.escape(&alias), self.map.escape(db));
        let condition = if let [column] = key_columns.as_slice() {
            let result_column = format!("ids_{}", dialect.build_column_alias(&alias, &column.database_name));
            let values: Vec<Value> = id_rows
                .iter()
                .map(|row| row.get(&result_column).cloned().unwrap_or(Value::Null))
                .collect();
            match values.iter().map(Value::numeric_literal).collect::<Option<Vec<_>>>() {
                Some(literals) => format!("{} IN ({})", column_ref(&column.database_name), literals.join(", ")),
                None => {
                    outer.set_parameter("orm_distinct_ids", Value::Array(values));
                    format!("{} IN (:...orm_distinct_ids)", column_ref(&column.database_name))
                }
            }
        } else {
            let mut alternatives = Vec::with_capacity(id_rows.len());
            for (i, row) in id_rows.iter().enumerate() {
                let mut keys = Vec::with_capacity(key_columns.len());
                for column in &key_columns {
                    let result_column = format!("ids_{}", dialect.build_column_alias(&alias, &column.database_name));
                    let name = format!("orm_distinct_ids_{i}_{}", column.database_name);
                    outer.set_parameter(name.clone(), row.get(&result_column).cloned().unwrap_or(Value::Null));
                    keys.push(format!("{} = :{name}", column_ref(&column.database_name)));
                }
                alternatives.push(format!("({})", keys.join(" AND ")));
            }
            format!("({})", alternatives.join(" OR "))
        };
        outer.extra_where = Some(condition);
        self.load_raw(runner, &outer).await
    }

    /// Result column alias of an `alias.property` expression over an entity alias.
    fn selected_column_alias(&self, expression: &str) -> Option<String> {
        let (alias, path) = expression.split_once('.')?;
        let metadata = self.map.aliases.find(alias)?.metadata.as_ref()?;
        match metadata.find_columns_with_property_path(path).as_slice() {
            [column] => Some(self.map.dialect.build_column_alias(alias, &column.database_name)),
            _ => None,
        }
    }

    fn count_map(&self) -> OrmResult<ExpressionMap> {
        let mut map = self.map.clone();
        map.order_bys.clear();
        map.group_bys.clear();
        map.limit = None;
        map.offset = None;
        map.skip = None;
        map.take = None;
        map.distinct = false;

        let main = map.main_alias()?;
        let metadata = main.metadata()?;
        let alias = map.escape(&main.name);
        let keys: Vec<String> = metadata
            .primary_columns()
            .map(|c| format!("{alias}.{}", map.escape(&c.database_name)))
            .collect();
        let expression = match keys.as_slice() {
            [] => "*".to_string(),
            [key] => format!("DISTINCT({key})"),
            keys => {
                let mut parts = Vec::with_capacity(keys.len() * 2);
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        parts.push("'|;|'".to_string());
                    }
                    parts.push(key.clone());
                }
                format!("DISTINCT({})", map.dialect.concat(&parts))
            }
        };
        map.selects = vec![SelectItem {
            selection: format!("COUNT({expression})"),
            alias_name: Some("cnt".to_string()),
        }];
        Ok(map)
    }

    async fn execute_count(&self, runner: &QueryRunner) -> OrmResult<u64> {
        self.check_lock_transaction(runner)?;
        let map = self.count_map()?;
        let rows = self.load_raw(runner, &map).await?;
        let count = rows
            .first()
            .and_then(|row| row.get("cnt"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    async fn hydrate(&self, runner: &QueryRunner, rows: &[Row]) -> OrmResult<Vec<EntityObject>> {
        let main = self.map.main_alias()?;
        let metadata = Arc::clone(main.metadata()?);
        let registry = self.source.registry();

        let relation_ids = RelationIdLoader::new(&self.source, runner, &self.map).load(rows).await?;
        let relation_counts = RelationCountLoader::new(&self.source, runner, &self.map).load(rows).await?;
        let mut entities =
            RawSqlResultsToEntityTransformer::new(&self.map, registry, &relation_ids, &relation_counts)
                .transform(rows, main)?;

        self.check_optimistic_lock(&metadata, &entities)?;
        if self.map.call_listeners && !entities.is_empty() {
            self.broadcast_loaded(runner.id(), &main.name, metadata, &mut entities).await?;
        }
        Ok(entities)
    }

    /// AfterLoad for `entities` of `alias`, innermost joined entities first.
    fn broadcast_loaded<'s>(
        &'s self,
        runner_id: u64,
        alias: &'s str,
        metadata: Arc<EntityMetadata>,
        entities: &'s mut [EntityObject],
    ) -> BoxFuture<'s, OrmResult<()>> {
        Box::pin(async move {
            for join in &self.map.joins {
                if join.parent_alias() != Some(alias) || !(join.selected || join.map_to.is_some()) {
                    continue;
                }
                let Some(child_metadata) = self.map.aliases.find(&join.alias).and_then(|a| a.metadata.clone()) else {
                    continue;
                };
                let property = match (&join.map_to, join.relation()) {
                    (Some(mapping), _) => mapping.property.clone(),
                    (None, Some(relation)) => relation.property_path.clone(),
                    (None, None) => continue,
                };
                for entity in entities.iter_mut() {
                    let nested = match get_path(entity, &property) {
                        Some(serde_json::Value::Object(object)) => vec![object.clone()],
                        Some(serde_json::Value::Array(items)) => items
                            .iter()
                            .filter_map(|item| item.as_object().cloned())
                            .collect(),
                        _ => continue,
                    };
                    let many = matches!(get_path(entity, &property), Some(serde_json::Value::Array(_)));
                    let mut nested = nested;
                    self.broadcast_loaded(runner_id, &join.alias, Arc::clone(&child_metadata), &mut nested)
                        .await?;
                    let value = if many {
                        serde_json::Value::Array(nested.into_iter().map(serde_json::Value::Object).collect())
                    } else {
                        nested
                            .into_iter()
                            .next()
                            .map(serde_json::Value::Object)
                            .unwrap_or(serde_json::Value::Null)
                    };
                    set_path(entity, &property, value);
                }
            }
            self.source
                .broadcaster()
                .broadcast_all(ListenerKind::AfterLoad, runner_id, &metadata, entities)
                .await
        })
    }

    fn check_optimistic_lock(&self, metadata: &EntityMetadata, entities: &[EntityObject]) -> OrmResult<()> {
        if self.map.lock_mode != Some(LockMode::Optimistic) {
            return Ok(());
        }
        let (Some(expected), Some(entity)) = (&self.map.lock_version, entities.first()) else {
            return Ok(());
        };
        let cannot_use = || OrmError::OptimisticLockCannotBeUsed(metadata.name.clone());
        let mismatch = |actual: Option<&serde_json::Value>| OrmError::OptimisticLockVersionMismatch {
            entity: metadata.name.clone(),
            expected: expected.to_string(),
            actual: match actual {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "null".to_string(),
            },
        };

        match expected {
            LockVersion::Version(version) => {
                let column = metadata.version_column().ok_or_else(cannot_use)?;
                let actual = column.get_entity_value(entity);
                if actual.and_then(serde_json::Value::as_i64) != Some(*version) {
                    return Err(mismatch(actual));
                }
            }
            LockVersion::Date(date) => {
                let column = metadata.update_date_column().ok_or_else(cannot_use)?;
                let actual = column.get_entity_value(entity);
                let loaded = actual
                    .and_then(serde_json::Value::as_str)
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok());
                if loaded.map(|d| d.timestamp_millis()) != Some(date.timestamp_millis()) {
                    return Err(mismatch(actual));
                }
            }
        }
        Ok(())
    }
}

/// Rows of [`SelectQueryBuilder::stream`].
#[must_use]
pub struct SelectStream {
    rows: RowStream,
    /// Runner owned by this stream, released on drop
    runner: Option<QueryRunner>,
}

impl Stream for SelectStream {
    type Item = OrmResult<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rows).poll_next(cx)
    }
}

impl Drop for SelectStream {
    fn drop(&mut self) {
        let Some(runner) = self.runner.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = runner.release().await {
                        tracing::warn!(target: "polyorm.runner", runner = runner.id(), error = %err, "releasing query runner failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(target: "polyorm.runner", runner = runner.id(), "stream dropped outside a runtime; runner not released");
            }
        }
    }
}

impl std::fmt::Debug for SelectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectStream")
            .field("owns_runner", &self.runner.is_some())
            .finish_non_exhaustive()
    }
}

fn format_order(expression: &str, order: Order, nulls: Option<Nulls>) -> String {
    let nulls = match nulls {
        Some(Nulls::First) => " NULLS FIRST",
        Some(Nulls::Last) => " NULLS LAST",
        None => "",
    };
    format!("{expression} {}{nulls}", order.as_sql())
}

/// Compile a SELECT expression map.
pub(crate) fn compile_select(map: &ExpressionMap, registry: &MetadataRegistry) -> OrmResult<String> {
    let dialect = map.dialect;

    let lock = match map.lock_mode {
        None => LockClause::None,
        Some(LockMode::Optimistic) => {
            let metadata = map.main_alias()?.metadata()?;
            if metadata.version_column().is_none() && metadata.update_date_column().is_none() {
                return Err(OrmError::OptimisticLockCannotBeUsed(metadata.name.clone()));
            }
            LockClause::None
        }
        Some(mode) => {
            let tables = map
                .lock_tables
                .iter()
                .map(|name| map.aliases.get(name).map(|a| map.escape(&a.name)))
                .collect::<OrmResult<Vec<_>>>()?;
            dialect.lock_clause(mode, &tables, map.on_locked)?
        }
    };
    let table_hint = match &lock {
        LockClause::TableHint(hint) => format!(" {hint}"),
        _ => String::new(),
    };

    let mut sql = String::from("SELECT ");
    if map.distinct {
        sql.push_str("DISTINCT ");
    }
    sql.push_str(&compile_selection(map, registry));

    let froms: Vec<String> = map
        .aliases
        .iter()
        .filter(|a| a.kind == AliasType::From)
        .map(|a| format!("{} {}{table_hint}", a.source_sql(dialect), map.escape(&a.name)))
        .collect();
    if !froms.is_empty() {
        sql.push_str(" FROM ");
        sql.push_str(&froms.join(", "));
    }

    for join in &map.joins {
        sql.push(' ');
        sql.push_str(&compile_join(map, registry, join, &table_hint)?);
    }

    sql.push_str(&compile_where(map, true)?);

    if !map.group_bys.is_empty() {
        let groups: Vec<String> = map
            .group_bys
            .iter()
            .map(|g| replace_property_names(g, dialect, &map.aliases))
            .collect();
        sql.push_str(" GROUP BY ");
        sql.push_str(&groups.join(", "));
    }

    if !map.havings.is_empty() {
        let ctx = RenderContext::new(map, true);
        sql.push_str(" HAVING ");
        sql.push_str(&render_clauses(&map.havings, &ctx)?);
    }

    if !map.order_bys.is_empty() {
        let orders: Vec<String> = map
            .order_bys
            .iter()
            .map(|o| format_order(&replace_property_names(&o.expression, dialect, &map.aliases), o.order, o.nulls))
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&orders.join(", "));
    }

    let (limit, offset) = map.effective_pagination();
    sql.push_str(&dialect.pagination_clause(limit, offset, !map.order_bys.is_empty())?);

    if let LockClause::Suffix(suffix) = &lock {
        sql.push_str(suffix);
    }
    Ok(sql)
}

fn compile_selection(map: &ExpressionMap, registry: &MetadataRegistry) -> String {
    let dialect = map.dialect;
    let mut columns = Vec::new();
    let mut consumed: HashSet<usize> = HashSet::new();

    for alias in map.aliases.iter() {
        let mut whole = false;
        let mut partial: HashSet<&str> = HashSet::new();
        for (i, item) in map.selects.iter().enumerate() {
            if item.alias_name.is_some() {
                continue;
            }
            if item.selection == alias.name {
                whole = true;
                consumed.insert(i);
            } else if let Some(path) = item.selection.strip_prefix(&format!("{}.", alias.name)) {
                let known = alias
                    .metadata
                    .as_ref()
                    .is_some_and(|m| !m.find_columns_with_property_path(path).is_empty());
                if known {
                    partial.insert(path);
                    consumed.insert(i);
                }
            }
        }
        if !whole && partial.is_empty() {
            continue;
        }

        let escaped_alias = map.escape(&alias.name);
        let Some(metadata) = &alias.metadata else {
            columns.push(format!("{escaped_alias}.*"));
            continue;
        };

        let mut sources = vec![Arc::clone(metadata)];
        if metadata.discriminator_column().is_some() {
            sources.extend(registry.descendants(&metadata.name));
        }
        let named: HashSet<&str> = partial
            .iter()
            .flat_map(|path| metadata.find_columns_with_property_path(path))
            .map(|c| c.database_name.as_str())
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        for source in &sources {
            for column in &source.columns {
                let selected = if whole {
                    !column.is_virtual && column.is_select
                } else {
                    named.contains(column.database_name.as_str()) || column.is_primary
                };
                if !selected || !seen.insert(column.database_name.clone()) {
                    continue;
                }
                columns.push(format!(
                    "{escaped_alias}.{} AS {}",
                    map.escape(&column.database_name),
                    map.escape(&dialect.build_column_alias(&alias.name, &column.database_name))
                ));
            }
        }
    }

    for (i, item) in map.selects.iter().enumerate() {
        if consumed.contains(&i) {
            continue;
        }
        let expression = replace_property_names(&item.selection, dialect, &map.aliases);
        match &item.alias_name {
            Some(name) => columns.push(format!("{expression} AS {}", map.escape(name))),
            None => columns.push(expression),
        }
    }

    if columns.is_empty() { "*".to_string() } else { columns.join(", ") }
}

fn compile_join(
    map: &ExpressionMap,
    registry: &MetadataRegistry,
    join: &JoinAttribute,
    table_hint: &str,
) -> OrmResult<String> {
    let dialect = map.dialect;
    let direction = join.direction.as_sql();
    let destination = map.escape(&join.alias);
    let ctx = RenderContext::new(map, true);
    let condition = join.condition.as_ref().map(|c| c.render(&ctx)).transpose()?;

    let soft_delete = |metadata: &EntityMetadata| match metadata.delete_date_column() {
        Some(column) if !map.with_deleted => {
            format!(" AND {destination}.{} IS NULL", map.escape(&column.database_name))
        }
        _ => String::new(),
    };
    let qualified = |alias: &str, column: &str| format!("{}.{}", map.escape(alias), map.escape(column));

    match &join.target {
        JoinTarget::Relation { parent_alias, relation } => {
            let target = registry.get(&relation.target)?;
            let parent = map.aliases.get(parent_alias)?.metadata()?;
            let table = format!("{}{table_hint}", dialect.escape_path(&target.table_path()));
            let extra = condition.map(|c| format!(" AND ({c})")).unwrap_or_default();

            if relation.is_to_one_owner() {
                let on = relation
                    .join_columns
                    .iter()
                    .map(|jc| {
                        format!(
                            "{}={}",
                            qualified(&join.alias, &column_name(&target, &jc.referenced_column)),
                            qualified(parent_alias, &jc.database_name)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" AND ");
                return Ok(format!(
                    "{direction} {table} {destination} ON {on}{extra}{}",
                    soft_delete(&target)
                ));
            }

            if relation.kind == crate::metadata::RelationKind::ManyToMany {
                let junction = registry.junction(relation)?;
                let junction_alias = dialect.shorten_alias(&format!("{parent_alias}_{}", join.alias));
                let owner_on = junction
                    .owner_columns
                    .iter()
                    .map(|jc| {
                        format!(
                            "{}={}",
                            qualified(&junction_alias, &jc.database_name),
                            qualified(parent_alias, &column_name(parent, &jc.referenced_column))
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" AND ");
                let inverse_on = junction
                    .inverse_columns
                    .iter()
                    .map(|jc| {
                        format!(
                            "{}={}",
                            qualified(&junction_alias, &jc.database_name),
                            qualified(&join.alias, &column_name(&target, &jc.referenced_column))
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" AND ");
                return Ok(format!(
                    "{direction} {}{table_hint} {} ON {owner_on} {direction} {table} {destination} ON {inverse_on}{extra}{}",
                    dialect.escape_path(&junction.table_name),
                    map.escape(&junction_alias),
                    soft_delete(&target)
                ));
            }

            let (_, inverse) = registry.inverse_relation(relation)?;
            let on = inverse
                .join_columns
                .iter()
                .map(|jc| {
                    format!(
                        "{}={}",
                        qualified(&join.alias, &jc.database_name),
                        qualified(parent_alias, &column_name(parent, &jc.referenced_column))
                    )
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            Ok(format!(
                "{direction} {table} {destination} ON {on}{extra}{}",
                soft_delete(&target)
            ))
        }
        JoinTarget::Entity(name) => {
            let target = registry.get(name)?;
            let on = condition.map(|c| format!(" ON {c}")).unwrap_or_default();
            let soft = if on.is_empty() { String::new() } else { soft_delete(&target) };
            Ok(format!(
                "{direction} {}{table_hint} {destination}{on}{soft}",
                dialect.escape_path(&target.table_path())
            ))
        }
        JoinTarget::Table(path) => {
            let on = condition.map(|c| format!(" ON {c}")).unwrap_or_default();
            Ok(format!("{direction} {}{table_hint} {destination}{on}", dialect.escape_path(path)))
        }
        JoinTarget::SubQuery(sub_query) => {
            let on = condition.map(|c| format!(" ON {c}")).unwrap_or_default();
            Ok(format!("{direction} {sub_query} {destination}{on}"))
        }
    }
}
