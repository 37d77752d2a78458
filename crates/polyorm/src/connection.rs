//! Data source: the factory for runners and builders.
//!
//! ```ignore
//! use polyorm::prelude::*;
//! use std::time::Duration;
//!
//! let source = DataSource::builder(PostgresDriver::from_url(&url)?)
//!     .registry(registry)
//!     .options(
//!         ConnectionOptions::new()
//!             .with_max_query_execution_time(Duration::from_millis(500))
//!             .with_cache(CacheOptions::default()),
//!     )
//!     .monitor(LoggingMonitor::new())
//!     .build();
//!
//! let users = source.query_builder("User", "user").get_many().await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheOptions, MemoryResultCache, ResultCache};
use crate::dialect::Dialect;
use crate::driver::{Driver, ReplicationMode};
use crate::error::OrmResult;
use crate::metadata::{EntityMetadata, MetadataRegistry};
use crate::monitor::{MonitorConfig, QueryHook, QueryMonitor};
use crate::query::execution::run_in_runner;
use crate::query::{
    DeleteQueryBuilder, InsertQueryBuilder, RelationQueryBuilder, SelectQueryBuilder, UpdateQueryBuilder,
};
use crate::runner::{
    Broadcaster, EntitySubscriber, ListenerKind, QueryResult, QueryRunner, RetryPolicy, RunnerContext,
};
use crate::value::Value;

/// Data-source-wide settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionOptions {
    /// Dialect used for SQL generation; defaults to the driver's
    pub dialect: Option<Dialect>,
    /// Statements slower than this are logged as slow queries
    pub max_query_execution_time: Option<Duration>,
    /// Give up waiting for a statement after this long
    pub query_timeout: Option<Duration>,
    /// Report every statement to the configured monitor
    pub monitoring: bool,
    /// Enables the result cache
    pub cache: Option<CacheOptions>,
    pub retry: RetryPolicy,
    /// Prefix for every table name
    pub entity_prefix: Option<String>,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn with_max_query_execution_time(mut self, duration: Duration) -> Self {
        self.max_query_execution_time = Some(duration);
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitoring = enabled;
        self
    }

    pub fn with_cache(mut self, cache: CacheOptions) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_entity_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.entity_prefix = Some(prefix.into());
        self
    }

    fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            max_query_execution_time: self.max_query_execution_time,
            query_timeout: self.query_timeout,
            monitoring_enabled: self.monitoring,
        }
    }
}

/// Assembles a [`DataSource`].
pub struct DataSourceBuilder {
    driver: Arc<dyn Driver>,
    registry: MetadataRegistry,
    options: ConnectionOptions,
    monitor: Option<Arc<dyn QueryMonitor>>,
    hook: Option<Arc<dyn QueryHook>>,
    cache: Option<Arc<dyn ResultCache>>,
    subscribers: Vec<Arc<dyn EntitySubscriber>>,
    listeners: Vec<(String, ListenerKind, crate::runner::EntityListener)>,
}

impl DataSourceBuilder {
    pub fn registry(mut self, registry: MetadataRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register one more entity.
    pub fn entity(mut self, metadata: EntityMetadata) -> OrmResult<Self> {
        self.registry.register(metadata)?;
        Ok(self)
    }

    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn monitor<M: QueryMonitor + 'static>(self, monitor: M) -> Self {
        self.monitor_arc(Arc::new(monitor))
    }

    pub fn monitor_arc(mut self, monitor: Arc<dyn QueryMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn hook<H: QueryHook + 'static>(mut self, hook: H) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Custom result cache; without one an in-memory LRU is used when caching is enabled.
    pub fn result_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn subscribe(mut self, subscriber: Arc<dyn EntitySubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Entity listener, also fired for inheritance children of `entity`.
    pub fn listen<F>(mut self, entity: impl Into<String>, kind: ListenerKind, listener: F) -> Self
    where
        F: Fn(&mut crate::metadata::EntityObject) -> OrmResult<()> + Send + Sync + 'static,
    {
        self.listeners.push((entity.into(), kind, Arc::new(listener)));
        self
    }

    pub fn build(self) -> DataSource {
        let registry = match &self.options.entity_prefix {
            Some(prefix) => self.registry.with_table_prefix(prefix),
            None => self.registry,
        };
        let registry = Arc::new(registry);

        let mut broadcaster = Broadcaster::new(Arc::clone(&registry));
        for subscriber in self.subscribers {
            broadcaster.subscribe(subscriber);
        }
        for (entity, kind, listener) in self.listeners {
            broadcaster.listen(entity, kind, move |object| listener(object));
        }

        let cache = match (self.cache, &self.options.cache) {
            (Some(cache), _) => Some(cache),
            (None, Some(options)) => Some(Arc::new(MemoryResultCache::new(options.capacity)) as Arc<dyn ResultCache>),
            (None, None) => None,
        };

        let context = RunnerContext {
            dialect: self.options.dialect.unwrap_or_else(|| self.driver.dialect()),
            driver: self.driver,
            broadcaster: Arc::new(broadcaster),
            monitor: self.monitor,
            hook: self.hook,
            config: self.options.monitor_config(),
            retry: self.options.retry.clone(),
        };

        DataSource {
            inner: Arc::new(DataSourceInner {
                context: Arc::new(context),
                registry,
                options: self.options,
                cache,
            }),
        }
    }
}

struct DataSourceInner {
    context: Arc<RunnerContext>,
    registry: Arc<MetadataRegistry>,
    options: ConnectionOptions,
    cache: Option<Arc<dyn ResultCache>>,
}

/// Entry point of the crate. Cheap to clone.
#[derive(Clone)]
pub struct DataSource {
    inner: Arc<DataSourceInner>,
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("dialect", &self.dialect())
            .field("entities", &self.inner.registry.len())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl DataSource {
    pub fn builder<D: Driver + 'static>(driver: D) -> DataSourceBuilder {
        Self::builder_arc(Arc::new(driver))
    }

    pub fn builder_arc(driver: Arc<dyn Driver>) -> DataSourceBuilder {
        DataSourceBuilder {
            driver,
            registry: MetadataRegistry::new(),
            options: ConnectionOptions::default(),
            monitor: None,
            hook: None,
            cache: None,
            subscribers: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.context.dialect
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.inner.registry
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    pub fn result_cache(&self) -> Option<&Arc<dyn ResultCache>> {
        self.inner.cache.as_ref()
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.inner.context.broadcaster
    }

    /// A new runner. The caller owns it and must release it.
    pub fn create_query_runner(&self, mode: ReplicationMode) -> QueryRunner {
        QueryRunner::new(Arc::clone(&self.inner.context), mode)
    }

    /// SELECT builder with no FROM yet.
    pub fn create_query_builder(&self) -> SelectQueryBuilder {
        SelectQueryBuilder::new(self.clone(), None)
    }

    /// SELECT of every column of `target` (an entity name or a table path) as `alias`.
    pub fn query_builder(&self, target: &str, alias: &str) -> SelectQueryBuilder {
        let mut qb = self.create_query_builder();
        qb.select([alias]).from(target, alias);
        qb
    }

    pub fn insert_builder(&self) -> InsertQueryBuilder {
        InsertQueryBuilder::new(self.clone(), None)
    }

    pub fn update_builder(&self, target: &str) -> UpdateQueryBuilder {
        UpdateQueryBuilder::new(self.clone(), None, target)
    }

    pub fn delete_builder(&self, target: &str) -> DeleteQueryBuilder {
        let mut builder = DeleteQueryBuilder::new(self.clone(), None);
        builder.from(target);
        builder
    }

    /// Relation builder for `entity.property`.
    pub fn relation_builder(&self, entity: &str, property: &str) -> RelationQueryBuilder {
        RelationQueryBuilder::new(self.clone(), None, entity, property)
    }

    /// Run one raw statement on a fresh runner.
    ///
    /// `sql` uses the dialect's own placeholders; `params` bind in order.
    pub async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<QueryResult> {
        run_in_runner(self, None, ReplicationMode::Master, false, |runner| async move {
            runner.query(sql, params).await
        })
        .await
    }

    /// Run `work` inside a transaction on a fresh runner.
    ///
    /// Commits when `work` succeeds and rolls back when it fails; the runner
    /// is released either way.
    pub async fn transaction<T, F, Fut>(&self, work: F) -> OrmResult<T>
    where
        F: FnOnce(QueryRunner) -> Fut,
        Fut: Future<Output = OrmResult<T>>,
    {
        run_in_runner(self, None, ReplicationMode::Master, true, work).await
    }

    /// Drop every cached result.
    pub async fn clear_cache(&self) -> OrmResult<()> {
        match &self.inner.cache {
            Some(cache) => cache.clear().await,
            None => Ok(()),
        }
    }
}
