//! Convenient imports for typical `polyorm` usage.
//!
//! ```ignore
//! use polyorm::prelude::*;
//! ```

pub use crate::{
    CacheOptions, ConnectionOptions, DataSource, Dialect, EntityObject, FromRow, LockMode, OrmError, OrmResult,
    QueryBuilder, ReplicationMode, Row, RowExt, Value, WhereExpressionBuilder, object,
};

pub use crate::query::{Brackets, FindWhere, LockVersion, Nulls, Op, Order, RawCondition, raw};

#[cfg(feature = "pool")]
pub use crate::PooledPostgresDriver;
pub use crate::PostgresDriver;
