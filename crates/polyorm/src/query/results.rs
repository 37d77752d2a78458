//! Results of write builders.

use crate::metadata::{EntityObject, set_path};

/// Outcome of an INSERT.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertResult {
    /// Primary key map per inserted row, `None` where it could not be determined
    pub identifiers: Vec<Option<EntityObject>>,
    /// Values produced by the database (or generated locally) per inserted row
    pub generated_maps: Vec<EntityObject>,
    pub raw: serde_json::Value,
}

impl InsertResult {
    /// Write the generated values back into the inserted objects, row by row.
    pub fn merge_into(&self, entities: &mut [EntityObject]) {
        for (entity, generated) in entities.iter_mut().zip(&self.generated_maps) {
            for (path, value) in generated {
                set_path(entity, path, value.clone());
            }
        }
    }

    /// First identifier, handy for single-row inserts.
    pub fn identifier(&self) -> Option<&EntityObject> {
        self.identifiers.first().and_then(Option::as_ref)
    }
}

/// Outcome of an UPDATE, soft delete or restore.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    pub raw: serde_json::Value,
    /// `None` when the driver cannot report it
    pub affected: Option<u64>,
    /// Returned rows mapped to property paths
    pub generated_maps: Vec<EntityObject>,
}

/// Outcome of a DELETE.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteResult {
    pub raw: serde_json::Value,
    pub affected: Option<u64>,
}
