//! Pooled Postgres driver on top of `deadpool-postgres`.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, PoolBuilder, RecyclingMethod};
use tokio_postgres::{Client, NoTls};

use super::postgres::{PgConnection, PgHandle};
use super::{Driver, DriverConnection, ReplicationMode};
use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};

/// A runner leases one pooled connection at connect time and keeps it until
/// release, so every statement of a transaction runs on that connection.
#[derive(Clone)]
pub struct PooledPostgresDriver {
    pool: Pool,
    dialect: Dialect,
}

impl PooledPostgresDriver {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            dialect: Dialect::Postgres,
        }
    }

    pub fn from_url(database_url: &str) -> OrmResult<Self> {
        Ok(Self::new(create_pool(database_url)?))
    }

    pub fn cockroach(mut self) -> Self {
        self.dialect = Dialect::CockroachDb;
        self
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl std::fmt::Debug for PooledPostgresDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledPostgresDriver")
            .field("dialect", &self.dialect)
            .field("status", &self.pool.status())
            .finish()
    }
}

impl PgHandle for deadpool_postgres::Object {
    fn client(&self) -> &Client {
        self
    }
}

#[async_trait]
impl Driver for PooledPostgresDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn connect(&self, _mode: ReplicationMode) -> OrmResult<Box<dyn DriverConnection>> {
        let object = self.pool.get().await?;
        Ok(Box::new(PgConnection::new(object)))
    }
}

/// Create a connection pool from a database URL with small default settings.
pub fn create_pool(database_url: &str) -> OrmResult<Pool> {
    create_pool_with_config(database_url, 16)
}

/// Create a connection pool with the given maximum size.
pub fn create_pool_with_config(database_url: &str, max_size: usize) -> OrmResult<Pool> {
    create_pool_with_builder(database_url, |builder| builder.max_size(max_size))
}

fn create_pool_with_builder(
    database_url: &str,
    configure_pool: impl FnOnce(PoolBuilder) -> PoolBuilder,
) -> OrmResult<Pool> {
    let pg_config: tokio_postgres::Config = database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| OrmError::Connection(e.to_string()))?;

    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    configure_pool(Pool::builder(manager))
        .build()
        .map_err(|e| OrmError::Pool(e.to_string()))
}
