//! Scripted driver and a small blog schema shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use polyorm::metadata::ColumnMetadata;
use polyorm::{
    ColumnType, DataSource, DataSourceBuilder, Dialect, Driver, DriverConnection, DriverResult, EntityMetadataBuilder,
    MetadataRegistry, OrmError, OrmResult, ReplicationMode, Row, Value,
};

/// One scripted answer.
pub enum Reply {
    Ok(DriverResult),
    Fail { message: String, transient: bool },
}

#[derive(Default)]
struct MockState {
    log: Mutex<Vec<(String, Vec<Value>)>>,
    replies: Mutex<VecDeque<Reply>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

/// Driver that records statements and answers from a queue.
///
/// Statements without a queued reply succeed with an empty result.
#[derive(Clone)]
pub struct MockDriver {
    dialect: Dialect,
    state: Arc<MockState>,
}

impl MockDriver {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            state: Arc::default(),
        }
    }

    pub fn respond(&self, result: DriverResult) -> &Self {
        self.state.replies.lock().unwrap().push_back(Reply::Ok(result));
        self
    }

    pub fn respond_rows(&self, rows: Vec<Row>) -> &Self {
        self.respond(DriverResult::from_rows(rows))
    }

    pub fn fail(&self, message: &str, transient: bool) -> &Self {
        self.state.replies.lock().unwrap().push_back(Reply::Fail {
            message: message.to_string(),
            transient,
        });
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.log.lock().unwrap().iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn params(&self, index: usize) -> Vec<Value> {
        self.state.log.lock().unwrap()[index].1.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

struct MockConnection {
    state: Arc<MockState>,
}

#[async_trait]
impl Driver for MockDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn connect(&self, _mode: ReplicationMode) -> OrmResult<Box<dyn DriverConnection>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

#[async_trait]
impl DriverConnection for MockConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> OrmResult<DriverResult> {
        self.state.log.lock().unwrap().push((sql.to_string(), params.to_vec()));
        match self.state.replies.lock().unwrap().pop_front() {
            Some(Reply::Ok(result)) => Ok(result),
            Some(Reply::Fail { message, transient }) => Err(OrmError::driver(std::io::Error::other(message), transient)),
            None => Ok(DriverResult::default()),
        }
    }

    async fn close(&mut self) -> OrmResult<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Authors, posts and tags.
pub fn blog_registry() -> MetadataRegistry {
    let mut registry = MetadataRegistry::new();
    registry
        .register(
            EntityMetadataBuilder::new("Author", "authors")
                .primary_generated("id")
                .column("name", ColumnType::Text)
                .add_column(ColumnMetadata::new("email", ColumnType::Text).nullable().named("email_address"))
                .delete_date("deletedAt")
                .one_to_many("posts", "Post", "author")
                .build(),
        )
        .unwrap();
    registry
        .register(
            EntityMetadataBuilder::new("Post", "posts")
                .primary_generated("id")
                .column("title", ColumnType::Text)
                .version("version")
                .many_to_one_with("author", "Author", &[("authorId", "id")], Some("posts"))
                .many_to_many("tags", "Tag", "post_tags", "postId", "tagId", None)
                .build(),
        )
        .unwrap();
    registry
        .register(
            EntityMetadataBuilder::new("Tag", "tags")
                .primary_generated("id")
                .column("label", ColumnType::Text)
                .build(),
        )
        .unwrap();
    registry
}

pub fn builder(dialect: Dialect) -> (DataSourceBuilder, MockDriver) {
    let driver = MockDriver::new(dialect);
    let builder = DataSource::builder(driver.clone()).registry(blog_registry());
    (builder, driver)
}

pub fn source(dialect: Dialect) -> (DataSource, MockDriver) {
    let (builder, driver) = builder(dialect);
    (builder.build(), driver)
}

pub fn row(pairs: &[(&str, Value)]) -> Row {
    Row::from_pairs(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())))
}
