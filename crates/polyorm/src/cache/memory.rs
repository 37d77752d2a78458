use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CacheEntry, ResultCache};
use crate::error::OrmResult;

/// Hit/miss counters of a [`MemoryResultCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// In-process LRU result cache.
///
/// Lookups of an expired entry count as misses; the entry stays until it is
/// overwritten or evicted.
#[derive(Debug)]
pub struct MemoryResultCache {
    inner: Mutex<LruInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug)]
struct LruInner {
    capacity: usize,
    map: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl MemoryResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                capacity,
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().map.contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryResultCache {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn get_from_cache(&self, key: &str) -> OrmResult<Option<CacheEntry>> {
        let entry = {
            let mut inner = self.lock();
            let entry = inner.map.get(key).cloned();
            if entry.is_some() {
                inner.touch(key);
            }
            entry
        };

        match &entry {
            Some(found) if !self.is_expired(found) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(entry)
    }

    async fn store_in_cache(
        &self,
        key: &str,
        previous: Option<&CacheEntry>,
        result: serde_json::Value,
        duration: Duration,
    ) -> OrmResult<()> {
        let mut inner = self.lock();
        if let Some(previous) = previous {
            if previous.identifier != key {
                inner.remove_key(&previous.identifier);
            }
        }

        let entry = CacheEntry {
            identifier: key.to_string(),
            time: Instant::now(),
            duration,
            result,
        };
        if inner.map.insert(key.to_string(), entry).is_some() {
            inner.touch(key);
        } else {
            inner.order.push_back(key.to_string());
        }
        let evicted = inner.evict_if_needed();
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> OrmResult<()> {
        let mut inner = self.lock();
        for key in keys {
            inner.remove_key(key);
        }
        Ok(())
    }

    async fn clear(&self) -> OrmResult<()> {
        let mut inner = self.lock();
        inner.map.clear();
        inner.order.clear();
        Ok(())
    }
}

impl LruInner {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k.as_str() == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn remove_key(&mut self, key: &str) {
        if self.map.remove(key).is_some() {
            if let Some(pos) = self.order.iter().position(|k| k.as_str() == key) {
                let _ = self.order.remove(pos);
            }
        }
    }

    fn evict_if_needed(&mut self) -> u64 {
        let mut evicted = 0;
        while self.map.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.map.remove(&oldest).is_some() {
                evicted += 1;
            }
        }
        evicted
    }
}
