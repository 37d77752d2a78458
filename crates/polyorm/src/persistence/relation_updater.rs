use std::sync::Arc;

use serde_json::Value as Json;

use super::{key_match_condition, referenced_value};
use crate::connection::DataSource;
use crate::error::{OrmError, OrmResult};
use crate::metadata::{EntityMetadata, EntityObject, JoinColumn, RelationKind, RelationMetadata};
use crate::query::{DeleteQueryBuilder, InsertQueryBuilder, QueryBuilder, UpdateQueryBuilder, WhereExpressionBuilder};
use crate::runner::QueryRunner;
use crate::value::Value;

/// Shared state of a relation write: the owning entity, the relation and the
/// normalized ids of the entities the write applies to.
struct RelationTarget<'a> {
    source: &'a DataSource,
    runner: &'a QueryRunner,
    metadata: &'a Arc<EntityMetadata>,
    relation: &'a RelationMetadata,
    of: &'a [EntityObject],
}

impl RelationTarget<'_> {
    fn target_metadata(&self) -> OrmResult<Arc<EntityMetadata>> {
        self.source.registry().get(&self.relation.target)
    }

    fn single_of(&self, operation: &str) -> OrmResult<&EntityObject> {
        match self.of {
            [one] => Ok(one),
            _ => Err(OrmError::usage(format!(
                "{operation} on {} relation {}.{} needs exactly one entity in of()",
                self.relation.kind.name(),
                self.metadata.name,
                self.relation.property_path
            ))),
        }
    }

    fn update_builder(&self, target: &str) -> UpdateQueryBuilder {
        let mut builder = self.source.update_builder(target);
        builder.set_query_runner(self.runner.clone());
        builder
    }

    /// Key tuples of `ids` for the given join columns, read on `metadata`.
    fn key_rows(&self, metadata: &EntityMetadata, ids: &[EntityObject], columns: &[JoinColumn]) -> OrmResult<Vec<Vec<Value>>> {
        let dialect = self.source.dialect();
        ids.iter()
            .map(|ids| {
                columns
                    .iter()
                    .map(|jc| referenced_value(dialect, metadata, ids, jc))
                    .collect()
            })
            .collect()
    }
}

fn id_values(ids: &[EntityObject]) -> Vec<Json> {
    ids.iter().cloned().map(Json::Object).collect()
}

/// Points relations at new entities.
///
/// - many-to-one and owning one-to-one: foreign key UPDATE on the owner rows
/// - one-to-many and inverse one-to-one: foreign key UPDATE on the target rows
/// - many-to-many: junction INSERT
pub struct RelationUpdater<'a> {
    target: RelationTarget<'a>,
}

impl<'a> RelationUpdater<'a> {
    pub(crate) fn new(
        source: &'a DataSource,
        runner: &'a QueryRunner,
        metadata: &'a Arc<EntityMetadata>,
        relation: &'a RelationMetadata,
        of: &'a [EntityObject],
    ) -> Self {
        Self {
            target: RelationTarget {
                source,
                runner,
                metadata,
                relation,
                of,
            },
        }
    }

    /// Relate `values` (ids or id maps of the target entity) to every `of` entity.
    ///
    /// For to-one owners `values` holds at most one element; an empty list or
    /// `null` clears the foreign key.
    pub async fn update(&self, values: &[Json]) -> OrmResult<()> {
        let t = &self.target;
        if t.relation.is_to_one_owner() {
            let value = match values {
                [] => Json::Null,
                [value] => value.clone(),
                _ => {
                    return Err(OrmError::usage(format!(
                        "{} relation {}.{} takes a single value",
                        t.relation.kind.name(),
                        t.metadata.name,
                        t.relation.property_path
                    )));
                }
            };
            let mut set = EntityObject::new();
            set.insert(t.relation.property_path.clone(), value);
            t.update_builder(&t.metadata.name)
                .set(set)
                .where_in_ids(id_values(t.of))
                .execute()
                .await?;
            return Ok(());
        }

        let target_metadata = t.target_metadata()?;
        let values = normalize_ids(&target_metadata, values)?;
        if values.is_empty() {
            return Ok(());
        }

        if t.relation.kind == RelationKind::ManyToMany {
            let junction = t.source.registry().junction(t.relation)?;
            let owner_rows = t.key_rows(t.metadata, t.of, &junction.owner_columns)?;
            let inverse_rows = t.key_rows(&target_metadata, &values, &junction.inverse_columns)?;
            let mut rows = Vec::with_capacity(owner_rows.len() * inverse_rows.len());
            for owner in &owner_rows {
                for inverse in &inverse_rows {
                    let mut row = EntityObject::new();
                    for (jc, value) in junction.owner_columns.iter().zip(owner) {
                        row.insert(jc.database_name.clone(), value.to_json());
                    }
                    for (jc, value) in junction.inverse_columns.iter().zip(inverse) {
                        row.insert(jc.database_name.clone(), value.to_json());
                    }
                    rows.push(row);
                }
            }
            InsertQueryBuilder::new(t.source.clone(), Some(t.runner.clone()))
                .into_table(&junction.table_name)
                .values(rows)
                .execute()
                .await?;
            return Ok(());
        }

        let (_, inverse) = t.source.registry().inverse_relation(t.relation)?;
        let of = t.single_of("update")?;
        let mut set = EntityObject::new();
        set.insert(inverse.property_path.clone(), Json::Object(of.clone()));
        t.update_builder(&target_metadata.name)
            .set(set)
            .where_in_ids(id_values(&values))
            .execute()
            .await?;
        Ok(())
    }
}

/// Detaches related entities.
///
/// - one-to-many and inverse one-to-one: sets the target's foreign key to NULL
/// - many-to-many: junction DELETE
pub struct RelationRemover<'a> {
    target: RelationTarget<'a>,
}

impl<'a> RelationRemover<'a> {
    pub(crate) fn new(
        source: &'a DataSource,
        runner: &'a QueryRunner,
        metadata: &'a Arc<EntityMetadata>,
        relation: &'a RelationMetadata,
        of: &'a [EntityObject],
    ) -> Self {
        Self {
            target: RelationTarget {
                source,
                runner,
                metadata,
                relation,
                of,
            },
        }
    }

    /// Detach `values` (ids or id maps of the target entity) from every `of` entity.
    pub async fn remove(&self, values: &[Json]) -> OrmResult<()> {
        let t = &self.target;
        let target_metadata = t.target_metadata()?;
        let values = normalize_ids(&target_metadata, values)?;
        if values.is_empty() || t.of.is_empty() {
            return Ok(());
        }
        let dialect = t.source.dialect();

        if t.relation.kind == RelationKind::ManyToMany {
            let junction = t.source.registry().junction(t.relation)?;
            let owner_columns: Vec<String> = junction.owner_columns.iter().map(|jc| jc.database_name.clone()).collect();
            let inverse_columns: Vec<String> =
                junction.inverse_columns.iter().map(|jc| jc.database_name.clone()).collect();
            let owner_rows = t.key_rows(t.metadata, t.of, &junction.owner_columns)?;
            let inverse_rows = t.key_rows(&target_metadata, &values, &junction.inverse_columns)?;

            let mut delete = DeleteQueryBuilder::new(t.source.clone(), Some(t.runner.clone()));
            delete
                .from(&junction.table_name)
                .where_(key_match_condition(dialect, None, &owner_columns, owner_rows, "orm_rel_of"))
                .and_where(key_match_condition(dialect, None, &inverse_columns, inverse_rows, "orm_rel_value"));
            delete.execute().await?;
            return Ok(());
        }

        if !t.relation.is_to_one_or_many_inverse() {
            return Err(OrmError::usage(format!(
                "cannot remove from {} relation {}.{}",
                t.relation.kind.name(),
                t.metadata.name,
                t.relation.property_path
            )));
        }
        self.detach(&target_metadata, Some(values)).await
    }

    /// Null the foreign key of every target row pointing at the `of` entities,
    /// restricted to `values` when given.
    pub(crate) async fn detach(&self, target_metadata: &Arc<EntityMetadata>, values: Option<Vec<EntityObject>>) -> OrmResult<()> {
        let t = &self.target;
        let (_, inverse) = t.source.registry().inverse_relation(t.relation)?;
        let fk_columns: Vec<String> = inverse.join_columns.iter().map(|jc| jc.database_name.clone()).collect();
        let of_rows = t.key_rows(t.metadata, t.of, &inverse.join_columns)?;

        let mut set = EntityObject::new();
        set.insert(inverse.property_path.clone(), Json::Null);
        let mut update = t.update_builder(&target_metadata.name);
        update
            .set(set)
            .where_(key_match_condition(t.source.dialect(), None, &fk_columns, of_rows, "orm_rel_of"));
        if let Some(values) = values {
            update.and_where_in_ids(id_values(&values));
        }
        update.execute().await?;
        Ok(())
    }
}

/// Id maps of `values`, each a bare id or an object holding the primary key.
fn normalize_ids(metadata: &EntityMetadata, values: &[Json]) -> OrmResult<Vec<EntityObject>> {
    values
        .iter()
        .filter(|v| !v.is_null())
        .map(|value| {
            metadata.ensure_entity_id_map(value).ok_or_else(|| OrmError::EntityIdMissing {
                entity: metadata.name.clone(),
            })
        })
        .collect()
}
