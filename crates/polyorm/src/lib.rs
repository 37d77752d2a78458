//! # polyorm
//!
//! A multi-dialect relational query builder, query runner and result hydrator.
//!
//! ## Features
//!
//! - **One expression model, many dialects**: Postgres, CockroachDB, MySQL, MariaDB,
//!   SQLite, libSQL, DuckDB, SQL Server, Oracle, SAP HANA and Spanner
//! - **Deterministic SQL**: parameters are bound when the fluent call is made, so
//!   compiling twice yields identical text
//! - **Entity-aware**: property paths, joins, relation ids and counts resolve through
//!   [`EntityMetadata`](metadata::EntityMetadata); rows hydrate back into object graphs
//! - **Exactly-once transactions**: nested builders reuse the caller's transaction,
//!   savepoints cover nesting, handles are consumed on commit or rollback
//! - **Query monitoring**: timing, slow-query warnings, hooks and `tracing` events
//!
//! ## Query builders
//!
//! ```ignore
//! use polyorm::prelude::*;
//! use serde_json::json;
//!
//! // SELECT
//! let mut qb = source.query_builder("User", "user");
//! qb.left_join_and_select("user.photos", "photo")
//!     .where_("user.firstName = :name")
//!     .set_parameter("name", "Timber")
//!     .order_by("user.id", Order::Desc)
//!     .take(10);
//! let users = qb.get_many().await?;
//!
//! // INSERT
//! source
//!     .insert_builder()
//!     .into_table("User")
//!     .value(object(json!({"firstName": "Timber", "lastName": "Saw"})))
//!     .execute()
//!     .await?;
//!
//! // UPDATE
//! source
//!     .update_builder("User")
//!     .set(object(json!({"lastName": "Saw"})))
//!     .where_in_ids([json!(1)])
//!     .execute()
//!     .await?;
//!
//! // DELETE
//! source.delete_builder("User").where_("id = :id").set_parameter("id", 1).execute().await?;
//! ```
//!
//! ## Transactions
//!
//! ```ignore
//! source
//!     .transaction(|runner| async move {
//!         let mut insert = source.insert_builder();
//!         insert.set_query_runner(runner.clone()).into_table("User").value(timber);
//!         insert.execute().await?;
//!         Ok(())
//!     })
//!     .await?;
//! ```

pub mod cache;
pub mod connection;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod hydration;
pub mod metadata;
pub mod monitor;
pub mod persistence;
pub mod prelude;
pub mod query;
pub mod row;
pub mod runner;
pub mod value;

#[cfg(test)]
mod testing;

pub use cache::{CacheEntry, CacheOptions, MemoryResultCache, ResultCache};
pub use connection::{ConnectionOptions, DataSource, DataSourceBuilder};
pub use dialect::{Dialect, LockMode, OnLocked};
pub use driver::{Driver, DriverConnection, DriverResult, PostgresDriver, ReplicationMode, RowStream};
#[cfg(feature = "pool")]
pub use driver::{PooledPostgresDriver, create_pool, create_pool_with_config};
pub use error::{OrmError, OrmResult};
pub use metadata::{ColumnType, EntityMetadata, EntityMetadataBuilder, EntityObject, MetadataRegistry};
pub use monitor::{
    CompositeHook, CompositeMonitor, HookAction, LoggingMonitor, MonitorConfig, NoopMonitor, QueryContext,
    QueryHook, QueryMonitor, QueryOutcome, QueryStats, QueryType, StatsMonitor, TracingSqlHook,
};
pub use query::{
    DeleteQueryBuilder, InsertQueryBuilder, QueryBuilder, RelationQueryBuilder, SelectQueryBuilder,
    SoftDeleteQueryBuilder, UpdateQueryBuilder, WhereExpressionBuilder,
};
pub use row::{FromRow, Row, RowExt};
pub use runner::{EntitySubscriber, ListenerKind, QueryResult, QueryRunner, RetryPolicy, TransactionHandle};
pub use value::{FromValue, Value};

/// Shorthand for building an [`EntityObject`] from `serde_json::json!`.
///
/// Non-object values produce an empty object.
pub fn object(value: serde_json::Value) -> EntityObject {
    match value {
        serde_json::Value::Object(map) => map,
        _ => EntityObject::new(),
    }
}
