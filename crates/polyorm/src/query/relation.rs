use std::sync::Arc;

use serde_json::Value as Json;

use super::execution::run_in_runner;
use super::expression_map::ExpressionMap;
use super::select::SelectQueryBuilder;
use super::where_builder::WhereExpressionBuilder;
use super::{QueryBuilder, QueryKind, RawCondition, register_main_alias};
use crate::connection::DataSource;
use crate::driver::ReplicationMode;
use crate::error::{OrmError, OrmResult};
use crate::metadata::{EntityMetadata, EntityObject, JoinColumn, RelationKind, RelationMetadata};
use crate::persistence::{RelationRemover, RelationUpdater, key_match_condition, referenced_value};
use crate::runner::QueryRunner;
use crate::value::Value;

/// Reads and writes one relation of a set of entities.
///
/// ```ignore
/// source
///     .relation_builder("Post", "categories")
///     .of(json!(1))
///     .add_and_remove(vec![json!(3), json!(4)], vec![json!(1)])
///     .await?;
/// ```
///
/// It compiles no SQL of its own: writes go through [`RelationUpdater`] and
/// [`RelationRemover`], loads through a [`SelectQueryBuilder`].
#[derive(Debug, Clone)]
pub struct RelationQueryBuilder {
    source: DataSource,
    runner: Option<QueryRunner>,
    map: ExpressionMap,
}

/// Resolved owner side of a relation operation.
struct Resolved {
    metadata: Arc<EntityMetadata>,
    relation: RelationMetadata,
    of: Vec<EntityObject>,
}

impl RelationQueryBuilder {
    pub(crate) fn new(source: DataSource, runner: Option<QueryRunner>, entity: &str, property: &str) -> Self {
        let mut map = ExpressionMap::new(source.dialect(), QueryKind::Relation);
        let registry = Arc::clone(source.registry());
        let result = register_main_alias(&mut map, &registry, entity, None);
        map.record(result);
        map.relation_property_path = Some(property.to_string());
        Self { source, runner, map }
    }

    pub(crate) fn from_parts(source: DataSource, runner: Option<QueryRunner>, map: ExpressionMap) -> Self {
        Self { source, runner, map }
    }

    /// Execute on this runner instead of a fresh one.
    pub fn set_query_runner(&mut self, runner: QueryRunner) -> &mut Self {
        self.runner = Some(runner);
        self
    }

    /// Run the writes of one call inside a transaction unless one is already active.
    pub fn use_transaction(&mut self, enabled: bool) -> &mut Self {
        self.map.use_transaction = enabled;
        self
    }

    /// Entities whose relation is read or written: bare ids, id maps or
    /// whole entity objects. An array is taken as several entities.
    pub fn of(&mut self, entities: Json) -> &mut Self {
        self.map.of = match entities {
            Json::Array(items) => items,
            single => vec![single],
        };
        self
    }

    /// Point a many-to-one or one-to-one relation at `value` (`null` clears it).
    pub async fn set(&self, value: Json) -> OrmResult<()> {
        let resolved = self.resolve("set", |kind| matches!(kind, RelationKind::ManyToOne | RelationKind::OneToOne))?;
        self.in_runner(move |source, runner| async move {
            let Resolved { metadata, relation, of } = &resolved;
            if relation.is_to_one_owner() {
                let values = if value.is_null() { Vec::new() } else { vec![value] };
                return RelationUpdater::new(&source, &runner, metadata, relation, of).update(&values).await;
            }
            // Inverse one-to-one: drop the current link before pointing the new target at us.
            let target = source.registry().get(&relation.target)?;
            RelationRemover::new(&source, &runner, metadata, relation, of).detach(&target, None).await?;
            if value.is_null() {
                return Ok(());
            }
            RelationUpdater::new(&source, &runner, metadata, relation, of).update(&[value]).await
        })
        .await
    }

    /// Relate more entities through a one-to-many or many-to-many relation.
    pub async fn add(&self, values: Vec<Json>) -> OrmResult<()> {
        self.add_and_remove(values, Vec::new()).await
    }

    /// Detach entities from a one-to-many or many-to-many relation.
    pub async fn remove(&self, values: Vec<Json>) -> OrmResult<()> {
        self.add_and_remove(Vec::new(), values).await
    }

    /// Remove first, then add, on the same runner.
    pub async fn add_and_remove(&self, added: Vec<Json>, removed: Vec<Json>) -> OrmResult<()> {
        let operation = match (added.is_empty(), removed.is_empty()) {
            (false, true) => "add",
            (true, false) => "remove",
            _ => "add_and_remove",
        };
        let resolved = self.resolve(operation, RelationKind::is_collection)?;
        self.in_runner(move |source, runner| async move {
            let Resolved { metadata, relation, of } = &resolved;
            if !removed.is_empty() {
                RelationRemover::new(&source, &runner, metadata, relation, of).remove(&removed).await?;
            }
            if !added.is_empty() {
                RelationUpdater::new(&source, &runner, metadata, relation, of).update(&added).await?;
            }
            Ok(())
        })
        .await
    }

    /// The related entity of a to-one relation, if any.
    pub async fn load_one(&self) -> OrmResult<Option<EntityObject>> {
        self.loader()?.get_one().await
    }

    /// Every related entity.
    pub async fn load_many(&self) -> OrmResult<Vec<EntityObject>> {
        self.loader()?.get_many().await
    }

    /// SELECT of the related entities, ready to be refined before running.
    pub fn loader(&self) -> OrmResult<SelectQueryBuilder> {
        let resolved = self.resolve("load", |_| true)?;
        build_loader(&self.source, self.runner.clone(), &resolved)
    }

    fn resolve(&self, operation: &'static str, allowed: impl Fn(RelationKind) -> bool) -> OrmResult<Resolved> {
        self.map.check()?;
        let metadata = Arc::clone(self.map.main_alias()?.metadata()?);
        let property = self
            .map
            .relation_property_path
            .as_deref()
            .ok_or_else(|| OrmError::usage("relation builder has no relation property"))?;
        let relation = metadata
            .find_relation(property)
            .cloned()
            .ok_or_else(|| OrmError::column_not_found(metadata.name.clone(), property))?;
        if !allowed(relation.kind) {
            return Err(OrmError::RelationCardinality {
                operation,
                kind: relation.kind.name(),
                entity: metadata.name.clone(),
                property: property.to_string(),
            });
        }
        if self.map.of.is_empty() {
            return Err(OrmError::usage(format!(
                "{operation}() on {}.{property} needs the owning entities; call of() first",
                metadata.name
            )));
        }
        let of = self
            .map
            .of
            .iter()
            .map(|id| {
                metadata.ensure_entity_id_map(id).ok_or_else(|| OrmError::EntityIdMissing {
                    entity: metadata.name.clone(),
                })
            })
            .collect::<OrmResult<Vec<_>>>()?;
        Ok(Resolved { metadata, relation, of })
    }

    async fn in_runner<F, Fut>(&self, work: F) -> OrmResult<()>
    where
        F: FnOnce(DataSource, QueryRunner) -> Fut,
        Fut: std::future::Future<Output = OrmResult<()>>,
    {
        let source = self.source.clone();
        run_in_runner(
            &self.source,
            self.runner.clone(),
            ReplicationMode::Master,
            self.map.use_transaction,
            |runner| work(source, runner),
        )
        .await
    }
}

const TARGET_ALIAS: &str = "relation_target";
const OWNER_ALIAS: &str = "relation_owner";
const JUNCTION_ALIAS: &str = "relation_junction";

/// SELECT of the entities on the far side of `resolved.relation`.
///
/// - owner to-one: target joined to the owner rows on the foreign key
/// - inverse to-one and one-to-many: target rows whose foreign key points at `of`
/// - many-to-many: target joined to the junction rows of `of`
fn build_loader(source: &DataSource, runner: Option<QueryRunner>, resolved: &Resolved) -> OrmResult<SelectQueryBuilder> {
    let Resolved { metadata, relation, of } = resolved;
    let dialect = source.dialect();
    let registry = source.registry();
    let target = registry.get(&relation.target)?;
    let qualified = |alias: &str, column: &str| format!("{}.{}", dialect.escape(alias), dialect.escape(column));
    let key_rows = |columns: &[JoinColumn]| -> OrmResult<Vec<Vec<Value>>> {
        of.iter()
            .map(|ids| columns.iter().map(|jc| referenced_value(dialect, metadata, ids, jc)).collect())
            .collect()
    };

    let mut qb = source.query_builder(&target.name, TARGET_ALIAS);
    if let Some(runner) = runner {
        qb.set_query_runner(runner);
    }

    if relation.is_to_one_owner() {
        let on = relation
            .join_columns
            .iter()
            .map(|jc| {
                format!(
                    "{} = {}",
                    qualified(OWNER_ALIAS, &jc.database_name),
                    qualified(TARGET_ALIAS, &jc.referenced_column)
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        let primaries: Vec<String> = metadata.primary_columns().map(|c| c.database_name.clone()).collect();
        let rows = of
            .iter()
            .map(|ids| {
                metadata
                    .primary_columns()
                    .map(|column| {
                        let value = ids.get(&column.property_path).unwrap_or(&Json::Null);
                        dialect.prepare_persistent_value(column, value)
                    })
                    .collect()
            })
            .collect();
        qb.inner_join_on(&metadata.name, OWNER_ALIAS, RawCondition::opaque(on))
            .where_(key_match_condition(dialect, Some(OWNER_ALIAS), &primaries, rows, "orm_rel_of"));
        return Ok(qb);
    }

    if relation.kind == RelationKind::ManyToMany {
        let junction = registry.junction(relation)?;
        let on = junction
            .inverse_columns
            .iter()
            .map(|jc| {
                format!(
                    "{} = {}",
                    qualified(JUNCTION_ALIAS, &jc.database_name),
                    qualified(TARGET_ALIAS, &jc.referenced_column)
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        let columns: Vec<String> = junction.owner_columns.iter().map(|jc| jc.database_name.clone()).collect();
        let rows = key_rows(&junction.owner_columns)?;
        qb.inner_join_on(&junction.table_name, JUNCTION_ALIAS, RawCondition::opaque(on))
            .where_(key_match_condition(dialect, Some(JUNCTION_ALIAS), &columns, rows, "orm_rel_of"));
        return Ok(qb);
    }

    let (_, inverse) = registry.inverse_relation(relation)?;
    let columns: Vec<String> = inverse.join_columns.iter().map(|jc| jc.database_name.clone()).collect();
    let rows = key_rows(&inverse.join_columns)?;
    qb.where_(key_match_condition(dialect, Some(TARGET_ALIAS), &columns, rows, "orm_rel_of"));
    Ok(qb)
}
