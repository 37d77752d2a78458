//! Driver abstraction.
//!
//! A [`Driver`] hands out [`DriverConnection`]s; everything above this layer
//! speaks only [`Value`] and [`Row`]. The crate ships a `tokio-postgres`
//! adapter and, behind the `pool` feature, a `deadpool-postgres` one.

mod postgres;
#[cfg(feature = "pool")]
mod pool;

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_core::Stream;

use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::row::Row;
use crate::value::Value;

pub use postgres::PostgresDriver;
#[cfg(feature = "pool")]
pub use pool::{PooledPostgresDriver, create_pool, create_pool_with_config};

/// Which replica a runner should talk to.
///
/// A hint only; drivers without replication ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReplicationMode {
    #[default]
    Master,
    Slave,
}

/// What a driver reports for one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverResult {
    pub rows: Vec<Row>,
    /// Rows changed by a write, if the driver can tell
    pub affected: Option<u64>,
    /// Generated id reported out of band (MySQL `insertId`, SQLite `lastID`)
    pub insert_id: Option<Value>,
    /// Driver-native result shape
    pub raw: serde_json::Value,
}

impl DriverResult {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let raw = serde_json::Value::Array(rows.iter().map(|r| serde_json::Value::Object(r.to_json_object())).collect());
        Self {
            rows,
            affected: None,
            insert_id: None,
            raw,
        }
    }

    pub fn affected(count: u64) -> Self {
        Self {
            rows: Vec::new(),
            affected: Some(count),
            insert_id: None,
            raw: serde_json::Value::from(count),
        }
    }

    pub fn with_insert_id(mut self, id: impl Into<Value>) -> Self {
        self.insert_id = Some(id.into());
        self
    }
}

/// Row stream returned by [`DriverConnection::stream`] and [`QueryRunner::stream`](crate::runner::QueryRunner::stream).
#[must_use]
pub struct RowStream {
    inner: Pin<Box<dyn Stream<Item = OrmResult<Row>> + Send>>,
}

impl RowStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = OrmResult<Row>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Stream over rows that are already in memory.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self::new(futures_util::stream::iter(rows.into_iter().map(Ok)))
    }
}

impl Stream for RowStream {
    type Item = OrmResult<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream").finish_non_exhaustive()
    }
}

/// Factory for database connections.
#[async_trait]
pub trait Driver: Send + Sync {
    fn dialect(&self) -> Dialect;

    async fn connect(&self, mode: ReplicationMode) -> OrmResult<Box<dyn DriverConnection>>;
}

/// One leased database connection.
///
/// Statements arrive with placeholders already rendered for the driver's
/// dialect and values in bind order.
#[async_trait]
pub trait DriverConnection: Send {
    async fn query(&mut self, sql: &str, params: &[Value]) -> OrmResult<DriverResult>;

    /// Incremental rows. Drivers that cannot stream report `DialectUnsupported`.
    async fn stream(&mut self, sql: &str, params: &[Value]) -> OrmResult<RowStream> {
        let _ = (sql, params);
        Err(OrmError::unsupported("driver", "row streaming"))
    }

    /// Give the connection back. Called exactly once per connection.
    async fn close(&mut self) -> OrmResult<()>;
}
