//! Shared entity fixtures and a recording driver for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::connection::DataSource;
use crate::dialect::Dialect;
use crate::driver::{Driver, DriverConnection, DriverResult, ReplicationMode};
use crate::error::OrmResult;
use crate::metadata::{ColumnMetadata, ColumnType, EntityMetadataBuilder, MetadataRegistry};
use crate::value::Value;

/// Driver that records every statement and answers from a script.
#[derive(Debug, Clone)]
pub(crate) struct RecordingDriver {
    dialect: Dialect,
    log: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    responses: Arc<Mutex<VecDeque<DriverResult>>>,
}

impl RecordingDriver {
    pub(crate) fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            log: Arc::default(),
            responses: Arc::default(),
        }
    }

    /// Answer the next unanswered statement with `result`.
    pub(crate) fn respond(&self, result: DriverResult) {
        self.responses.lock().unwrap().push_back(result);
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub(crate) fn params(&self, index: usize) -> Vec<Value> {
        self.log.lock().unwrap()[index].1.clone()
    }
}

struct RecordingConnection {
    driver: RecordingDriver,
}

#[async_trait]
impl Driver for RecordingDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn connect(&self, _mode: ReplicationMode) -> OrmResult<Box<dyn DriverConnection>> {
        Ok(Box::new(RecordingConnection { driver: self.clone() }))
    }
}

#[async_trait]
impl DriverConnection for RecordingConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> OrmResult<DriverResult> {
        self.driver.log.lock().unwrap().push((sql.to_string(), params.to_vec()));
        let scripted = self.driver.responses.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_default())
    }

    async fn close(&mut self) -> OrmResult<()> {
        Ok(())
    }
}

/// Data source over the fixture registry and a fresh recording driver.
pub(crate) fn source(dialect: Dialect) -> (DataSource, RecordingDriver) {
    let driver = RecordingDriver::new(dialect);
    let source = DataSource::builder(driver.clone()).registry(registry()).build();
    (source, driver)
}

pub(crate) fn registry() -> MetadataRegistry {
    let mut registry = MetadataRegistry::new();

    registry
        .register(
            EntityMetadataBuilder::new("User", "users")
                .primary_generated("id")
                .add_column(ColumnMetadata::new("firstName", ColumnType::Text).named("first_name"))
                .nullable_column("lastName", ColumnType::Text)
                .version("version")
                .update_date("updatedAt")
                .delete_date("deletedAt")
                .one_to_one_owner("profile", "Profile", "profileId", Some("user"))
                .one_to_many("posts", "Post", "author")
                .one_to_many("photos", "Photo", "user")
                .build(),
        )
        .expect("User");

    registry
        .register(
            EntityMetadataBuilder::new("Post", "posts")
                .primary_generated("id")
                .column("title", ColumnType::Text)
                .create_date("createdAt")
                .many_to_one_with("author", "User", &[("authorId", "id")], Some("posts"))
                .many_to_many(
                    "categories",
                    "Category",
                    "post_categories",
                    "postId",
                    "categoryId",
                    Some("posts"),
                )
                .build(),
        )
        .expect("Post");

    registry
        .register(
            EntityMetadataBuilder::new("Category", "categories")
                .primary_generated("id")
                .column("name", ColumnType::Text)
                .many_to_many_inverse("posts", "Post", "categories")
                .build(),
        )
        .expect("Category");

    registry
        .register(
            EntityMetadataBuilder::new("Photo", "photos")
                .primary_uuid("id")
                .column("url", ColumnType::Text)
                .many_to_one_with("user", "User", &[("userId", "id")], Some("photos"))
                .build(),
        )
        .expect("Photo");

    registry
        .register(
            EntityMetadataBuilder::new("Profile", "profiles")
                .primary_generated("id")
                .nullable_column("bio", ColumnType::Text)
                .one_to_one_inverse("user", "User", "profile")
                .build(),
        )
        .expect("Profile");

    registry
        .register(
            EntityMetadataBuilder::new("Membership", "memberships")
                .primary("userId", ColumnType::Integer)
                .primary("groupId", ColumnType::Integer)
                .column("role", ColumnType::Text)
                .build(),
        )
        .expect("Membership");

    registry
        .register(
            EntityMetadataBuilder::new("Content", "content")
                .primary_generated("id")
                .column("title", ColumnType::Text)
                .discriminator("kind", "content")
                .build(),
        )
        .expect("Content");

    registry
        .register(
            EntityMetadataBuilder::new("Article", "content")
                .extends("Content", "article")
                .nullable_column("body", ColumnType::Text)
                .build(),
        )
        .expect("Article");

    registry
}
