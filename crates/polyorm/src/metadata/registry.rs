use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{OrmError, OrmResult};

use super::{EntityMetadata, JunctionTable, RelationKind, RelationMetadata};

/// All known entities plus the inheritance table used for subtype matching.
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    entities: HashMap<String, Arc<EntityMetadata>>,
    /// child name -> parent name
    parents: HashMap<String, String>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity.
    ///
    /// A child entity (see [`EntityMetadataBuilder::extends`](super::EntityMetadataBuilder::extends))
    /// requires its parent to be registered first; it inherits the parent's table and
    /// every column or relation it does not redefine.
    pub fn register(&mut self, mut metadata: EntityMetadata) -> OrmResult<()> {
        if let Some(inheritance) = metadata.inheritance.clone() {
            let parent = self
                .entities
                .get(&inheritance.parent)
                .cloned()
                .ok_or_else(|| OrmError::MetadataNotFound(inheritance.parent.clone()))?;

            metadata.table_name = parent.table_name.clone();
            metadata.schema = parent.schema.clone();
            let mut columns = parent.columns.clone();
            for column in std::mem::take(&mut metadata.columns) {
                columns.retain(|c| c.property_path != column.property_path);
                columns.push(column);
            }
            metadata.columns = columns;
            let mut relations = parent.relations.clone();
            for relation in std::mem::take(&mut metadata.relations) {
                relations.retain(|r| r.property_path != relation.property_path);
                relations.push(relation);
            }
            metadata.relations = relations;

            let mut updated_parent = (*parent).clone();
            if !updated_parent.children.contains(&metadata.name) {
                updated_parent.children.push(metadata.name.clone());
            }
            self.entities
                .insert(updated_parent.name.clone(), Arc::new(updated_parent));
            self.parents
                .insert(metadata.name.clone(), inheritance.parent.clone());
        }

        self.entities
            .insert(metadata.name.clone(), Arc::new(metadata));
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, metadata: EntityMetadata) -> OrmResult<Self> {
        self.register(metadata)?;
        Ok(self)
    }

    /// Look up by entity name, falling back to table name.
    pub fn find(&self, target: &str) -> Option<Arc<EntityMetadata>> {
        self.entities.get(target).cloned().or_else(|| {
            self.entities
                .values()
                .find(|m| m.inheritance.is_none() && m.table_name == target)
                .cloned()
        })
    }

    pub fn get(&self, target: &str) -> OrmResult<Arc<EntityMetadata>> {
        self.find(target)
            .ok_or_else(|| OrmError::MetadataNotFound(target.to_string()))
    }

    /// Copy of the registry with `prefix` put in front of every table and junction table name.
    pub fn with_table_prefix(&self, prefix: &str) -> Self {
        if prefix.is_empty() {
            return self.clone();
        }
        let entities = self
            .entities
            .iter()
            .map(|(name, metadata)| {
                let mut metadata = (**metadata).clone();
                metadata.table_name = format!("{prefix}{}", metadata.table_name);
                for relation in &mut metadata.relations {
                    if let Some(junction) = &mut relation.junction {
                        junction.table_name = format!("{prefix}{}", junction.table_name);
                    }
                }
                (name.clone(), Arc::new(metadata))
            })
            .collect();
        Self {
            entities,
            parents: self.parents.clone(),
        }
    }

    pub fn has(&self, target: &str) -> bool {
        self.find(target).is_some()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// True if `entity` is `ancestor` or inherits from it.
    pub fn is_subtype_of(&self, entity: &str, ancestor: &str) -> bool {
        let mut current = Some(entity);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self.parents.get(name).map(String::as_str);
        }
        false
    }

    /// Transitive children of an entity, nearest first.
    pub fn descendants(&self, entity: &str) -> Vec<Arc<EntityMetadata>> {
        let mut found = Vec::new();
        let mut queue = vec![entity.to_string()];
        while let Some(name) = queue.pop() {
            if let Some(meta) = self.entities.get(&name) {
                for child in &meta.children {
                    if let Some(child_meta) = self.entities.get(child) {
                        found.push(child_meta.clone());
                        queue.push(child.clone());
                    }
                }
            }
        }
        found
    }

    /// The relation on the target entity that points back at `relation`.
    pub fn inverse_relation(
        &self,
        relation: &RelationMetadata,
    ) -> OrmResult<(Arc<EntityMetadata>, RelationMetadata)> {
        let target = self.get(&relation.target)?;
        let inverse_name = relation.inverse_side.as_deref().ok_or_else(|| {
            OrmError::usage(format!(
                "relation {} has no inverse side configured",
                relation.property_path
            ))
        })?;
        let inverse = target.find_relation(inverse_name).cloned().ok_or_else(|| {
            OrmError::column_not_found(target.name.clone(), inverse_name.to_string())
        })?;
        Ok((target, inverse))
    }

    /// Junction table of a many-to-many relation, oriented from `relation`'s side.
    ///
    /// For the inverse side the owner's junction is returned with its column
    /// groups swapped, so `owner_columns` always point at the entity holding `relation`.
    pub fn junction(&self, relation: &RelationMetadata) -> OrmResult<JunctionTable> {
        if relation.kind != RelationKind::ManyToMany {
            return Err(OrmError::usage(format!(
                "relation {} is not many-to-many",
                relation.property_path
            )));
        }
        if let Some(junction) = &relation.junction {
            return Ok(junction.clone());
        }
        let (_, owner) = self.inverse_relation(relation)?;
        let junction = owner.junction.ok_or_else(|| {
            OrmError::usage(format!(
                "neither side of relation {} defines a junction table",
                relation.property_path
            ))
        })?;
        Ok(JunctionTable {
            table_name: junction.table_name,
            owner_columns: junction.inverse_columns,
            inverse_columns: junction.owner_columns,
        })
    }
}
