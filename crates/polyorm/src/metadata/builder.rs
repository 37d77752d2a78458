use super::{
    ColumnMetadata, ColumnType, EntityMetadata, GenerationStrategy, Inheritance, JoinColumn,
    JunctionTable, RelationKind, RelationMetadata,
};

impl ColumnMetadata {
    /// Override the database column name.
    pub fn named(mut self, database_name: impl Into<String>) -> Self {
        self.database_name = database_name.into();
        self
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.is_nullable = true;
        self
    }

    pub fn generated(mut self, strategy: GenerationStrategy) -> Self {
        self.generation = Some(strategy);
        self
    }

    /// Database-side default expression.
    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Exclude from default selections.
    pub fn hidden(mut self) -> Self {
        self.is_select = false;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.is_insert = false;
        self.is_update = false;
        self
    }
}

/// Fluent construction of [`EntityMetadata`].
///
/// ```ignore
/// let post = EntityMetadataBuilder::new("Post", "posts")
///     .primary_generated("id")
///     .column("title", ColumnType::Text)
///     .version("version")
///     .many_to_one("author", "User", "authorId")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct EntityMetadataBuilder {
    metadata: EntityMetadata,
}

impl EntityMetadataBuilder {
    pub fn new(name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            metadata: EntityMetadata {
                name: name.into(),
                table_name: table_name.into(),
                schema: None,
                columns: Vec::new(),
                relations: Vec::new(),
                inheritance: None,
                discriminator_value: None,
                children: Vec::new(),
            },
        }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.metadata.schema = Some(schema.into());
        self
    }

    pub fn add_column(mut self, column: ColumnMetadata) -> Self {
        self.metadata.columns.push(column);
        self
    }

    pub fn column(self, path: impl Into<String>, column_type: ColumnType) -> Self {
        self.add_column(ColumnMetadata::new(path, column_type))
    }

    pub fn nullable_column(self, path: impl Into<String>, column_type: ColumnType) -> Self {
        self.add_column(ColumnMetadata::new(path, column_type).nullable())
    }

    pub fn primary(self, path: impl Into<String>, column_type: ColumnType) -> Self {
        self.add_column(ColumnMetadata::new(path, column_type).primary())
    }

    /// Auto-increment integer primary key.
    pub fn primary_generated(self, path: impl Into<String>) -> Self {
        self.add_column(
            ColumnMetadata::new(path, ColumnType::Integer)
                .primary()
                .generated(GenerationStrategy::Increment),
        )
    }

    /// UUID primary key, generated by the database or client-side.
    pub fn primary_uuid(self, path: impl Into<String>) -> Self {
        self.add_column(
            ColumnMetadata::new(path, ColumnType::Uuid)
                .primary()
                .generated(GenerationStrategy::Uuid),
        )
    }

    pub fn create_date(self, path: impl Into<String>) -> Self {
        let mut column = ColumnMetadata::new(path, ColumnType::Timestamp).default_expr("CURRENT_TIMESTAMP");
        column.is_create_date = true;
        column.is_update = false;
        self.add_column(column)
    }

    pub fn update_date(self, path: impl Into<String>) -> Self {
        let mut column = ColumnMetadata::new(path, ColumnType::Timestamp).default_expr("CURRENT_TIMESTAMP");
        column.is_update_date = true;
        self.add_column(column)
    }

    pub fn delete_date(self, path: impl Into<String>) -> Self {
        let mut column = ColumnMetadata::new(path, ColumnType::Timestamp).nullable();
        column.is_delete_date = true;
        self.add_column(column)
    }

    pub fn version(self, path: impl Into<String>) -> Self {
        let mut column = ColumnMetadata::new(path, ColumnType::Integer);
        column.is_version = true;
        self.add_column(column)
    }

    /// Discriminator column of a single-table inheritance root.
    pub fn discriminator(mut self, path: impl Into<String>, root_value: impl Into<String>) -> Self {
        let mut column = ColumnMetadata::new(path, ColumnType::Text);
        column.is_discriminator = true;
        self.metadata.discriminator_value = Some(root_value.into());
        self.add_column(column)
    }

    /// Mark this entity as a single-table inheritance child.
    ///
    /// The registry copies the parent's table, columns and relations at registration.
    pub fn extends(mut self, parent: impl Into<String>, discriminator_value: impl Into<String>) -> Self {
        self.metadata.inheritance = Some(Inheritance {
            parent: parent.into(),
            discriminator_value: discriminator_value.into(),
        });
        self
    }

    /// Many-to-one relation with a single join column referencing `id`.
    pub fn many_to_one(self, property: &str, target: &str, join_column: &str) -> Self {
        self.to_one_owner(RelationKind::ManyToOne, property, target, &[(join_column, "id")], None)
    }

    /// Many-to-one relation with explicit `(join column, referenced column)` pairs.
    pub fn many_to_one_with(
        self,
        property: &str,
        target: &str,
        join_columns: &[(&str, &str)],
        inverse_side: Option<&str>,
    ) -> Self {
        self.to_one_owner(RelationKind::ManyToOne, property, target, join_columns, inverse_side)
    }

    /// Owning side of a one-to-one relation.
    pub fn one_to_one_owner(self, property: &str, target: &str, join_column: &str, inverse_side: Option<&str>) -> Self {
        self.to_one_owner(RelationKind::OneToOne, property, target, &[(join_column, "id")], inverse_side)
    }

    /// Inverse side of a one-to-one relation; `inverse_side` is the owning property on `target`.
    pub fn one_to_one_inverse(self, property: &str, target: &str, inverse_side: &str) -> Self {
        self.inverse(RelationKind::OneToOne, property, target, inverse_side)
    }

    /// One-to-many relation; `inverse_side` is the many-to-one property on `target`.
    pub fn one_to_many(self, property: &str, target: &str, inverse_side: &str) -> Self {
        self.inverse(RelationKind::OneToMany, property, target, inverse_side)
    }

    /// Owning side of a many-to-many relation with single-column keys on both sides.
    pub fn many_to_many(
        mut self,
        property: &str,
        target: &str,
        junction_table: &str,
        owner_column: &str,
        inverse_column: &str,
        inverse_side: Option<&str>,
    ) -> Self {
        self.metadata.relations.push(RelationMetadata {
            property_path: property.to_string(),
            kind: RelationKind::ManyToMany,
            target: target.to_string(),
            is_owning: true,
            inverse_side: inverse_side.map(str::to_string),
            join_columns: Vec::new(),
            junction: Some(JunctionTable {
                table_name: junction_table.to_string(),
                owner_columns: vec![JoinColumn {
                    database_name: owner_column.to_string(),
                    referenced_column: "id".to_string(),
                }],
                inverse_columns: vec![JoinColumn {
                    database_name: inverse_column.to_string(),
                    referenced_column: "id".to_string(),
                }],
            }),
            is_nullable: true,
        });
        self
    }

    /// Inverse side of a many-to-many relation; the junction is read from the owner.
    pub fn many_to_many_inverse(self, property: &str, target: &str, inverse_side: &str) -> Self {
        self.inverse(RelationKind::ManyToMany, property, target, inverse_side)
    }

    fn to_one_owner(
        mut self,
        kind: RelationKind,
        property: &str,
        target: &str,
        join_columns: &[(&str, &str)],
        inverse_side: Option<&str>,
    ) -> Self {
        for (column, referenced) in join_columns {
            let mut fk = ColumnMetadata::new(property, ColumnType::Integer)
                .named(*column)
                .nullable();
            fk.relation = Some(property.to_string());
            fk.referenced_property = Some(referenced.to_string());
            self.metadata.columns.push(fk);
        }
        self.metadata.relations.push(RelationMetadata {
            property_path: property.to_string(),
            kind,
            target: target.to_string(),
            is_owning: true,
            inverse_side: inverse_side.map(str::to_string),
            join_columns: join_columns
                .iter()
                .map(|(column, referenced)| JoinColumn {
                    database_name: column.to_string(),
                    referenced_column: referenced.to_string(),
                })
                .collect(),
            junction: None,
            is_nullable: true,
        });
        self
    }

    fn inverse(mut self, kind: RelationKind, property: &str, target: &str, inverse_side: &str) -> Self {
        self.metadata.relations.push(RelationMetadata {
            property_path: property.to_string(),
            kind,
            target: target.to_string(),
            is_owning: false,
            inverse_side: Some(inverse_side.to_string()),
            join_columns: Vec::new(),
            junction: None,
            is_nullable: true,
        });
        self
    }

    pub fn build(self) -> EntityMetadata {
        self.metadata
    }
}
