//! Query result cache.
//!
//! Select builders with `.cache(..)` (or a data source whose
//! [`CacheOptions::always_enabled`] is set) look results up here before
//! running SQL. Entries are JSON snapshots of the raw rows, so a hit
//! returns exactly the row shape the live query produced.

mod memory;


use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::OrmResult;
use crate::row::Row;
use crate::value::Value;

pub use memory::{CacheStats, MemoryResultCache};

/// One stored result.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub identifier: String,
    pub time: Instant,
    pub duration: Duration,
    pub result: serde_json::Value,
}

impl CacheEntry {
    /// Decode the stored row snapshot.
    pub fn rows(&self) -> OrmResult<Vec<Row>> {
        Ok(serde_json::from_value(self.result.clone())?)
    }
}

/// Storage for cached query results.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get_from_cache(&self, key: &str) -> OrmResult<Option<CacheEntry>>;

    /// An entry is stale once more than its duration has passed since it was stored.
    fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.time.elapsed() > entry.duration
    }

    /// Store `result` under `key`, replacing `previous` when given.
    async fn store_in_cache(
        &self,
        key: &str,
        previous: Option<&CacheEntry>,
        result: serde_json::Value,
        duration: Duration,
    ) -> OrmResult<()>;

    async fn remove(&self, keys: &[String]) -> OrmResult<()>;

    async fn clear(&self) -> OrmResult<()>;
}

/// Data-source-wide cache defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Lifetime of an entry when a query does not set its own
    pub duration: Duration,
    /// Cache every select, not only those that ask for it
    pub always_enabled: bool,
    /// Entries kept by the in-memory cache
    pub capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(1000),
            always_enabled: false,
            capacity: 256,
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn always_enabled(mut self) -> Self {
        self.always_enabled = true;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

/// Cache key of a compiled statement: the SQL followed by its serialized parameters.
pub fn cache_key(sql: &str, params: &[Value]) -> String {
    let params = serde_json::to_string(params).unwrap_or_default();
    format!("{sql} -- PARAMETERS: {params}")
}
