//! §4.8's expansion: a read-through [`Backend`] decorator built on the
//! `lru` crate rather than this workspace's own concurrent cache —
//! the commit model (§5) is single-threaded cooperative, so there is
//! no reader/writer contention for an eviction policy to arbitrate.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::key::{Key, Value};
use crate::key_range::KeyRange;
use crate::memindex::IndexDef;
use crate::Result;

use super::{Backend, BackendBatch};

const DEFAULT_CAPACITY: usize = 5000;

/// Wraps any [`Backend`] with a per-table LRU of decoded values,
/// keyed by primary key. Range queries, index lookups, and streams
/// always go straight to the inner backend: the cache only shortcuts
/// point `get`s, which is where the hit rate in §4.8's scenario lives.
pub struct CachedBackend<B: Backend> {
    inner: B,
    capacity: NonZeroUsize,
    caches: HashMap<String, LruCache<Key, Value>>,
}

impl<B: Backend> CachedBackend<B> {
    pub fn new(inner: B) -> CachedBackend<B> {
        CachedBackend::with_capacity(inner, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: B, capacity: usize) -> CachedBackend<B> {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        CachedBackend {
            inner,
            capacity,
            caches: HashMap::new(),
        }
    }

    fn cache_for(&mut self, table: &str) -> &mut LruCache<Key, Value> {
        self.caches
            .entry(table.to_string())
            .or_insert_with(|| LruCache::new(self.capacity))
    }

    fn evict(&mut self, table: &str, key: &Key) {
        if let Some(cache) = self.caches.get_mut(table) {
            cache.pop(key);
        }
    }
}

impl<B: Backend> Backend for CachedBackend<B> {
    fn create_table(&mut self, table: &str) -> Result<()> {
        self.inner.create_table(table)
    }

    fn delete_table(&mut self, table: &str) -> Result<()> {
        self.caches.remove(table);
        self.inner.delete_table(table)
    }

    fn create_index(&mut self, table: &str, def: IndexDef) -> Result<()> {
        self.inner.create_index(table, def)
    }

    fn delete_index(&mut self, table: &str, index_name: &str) -> Result<()> {
        self.inner.delete_index(table, index_name)
    }

    fn get(&mut self, table: &str, key: &Key) -> Result<Option<Value>> {
        if let Some(value) = self.cache_for(table).get(key) {
            return Ok(Some(value.clone()));
        }
        let fetched = self.inner.get(table, key)?;
        if let Some(value) = &fetched {
            self.cache_for(table).put(key.clone(), value.clone());
        }
        Ok(fetched)
    }

    fn put(&mut self, table: &str, key: Key, value: Value) -> Result<()> {
        self.cache_for(table).put(key.clone(), value.clone());
        self.inner.put(table, key, value)
    }

    fn remove(&mut self, table: &str, key: &Key) -> Result<()> {
        self.evict(table, key);
        self.inner.remove(table, key)
    }

    fn keys(&mut self, table: &str, range: &KeyRange) -> Result<Vec<Key>> {
        self.inner.keys(table, range)
    }

    fn values(&mut self, table: &str, range: &KeyRange) -> Result<Vec<Value>> {
        self.inner.values(table, range)
    }

    fn min_key(&mut self, table: &str, range: &KeyRange) -> Result<Option<Key>> {
        self.inner.min_key(table, range)
    }

    fn max_key(&mut self, table: &str, range: &KeyRange) -> Result<Option<Key>> {
        self.inner.max_key(table, range)
    }

    fn min_value(&mut self, table: &str, range: &KeyRange) -> Result<Option<Value>> {
        self.inner.min_value(table, range)
    }

    fn max_value(&mut self, table: &str, range: &KeyRange) -> Result<Option<Value>> {
        self.inner.max_value(table, range)
    }

    fn count(&mut self, table: &str, range: &KeyRange) -> Result<usize> {
        self.inner.count(table, range)
    }

    fn index_keys(
        &mut self,
        table: &str,
        index_name: &str,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> Result<Vec<Key>> {
        self.inner.index_keys(table, index_name, range, limit)
    }

    fn index_min_keys(&mut self, table: &str, index_name: &str, range: &KeyRange) -> Result<Vec<Key>> {
        self.inner.index_min_keys(table, index_name, range)
    }

    fn index_max_keys(&mut self, table: &str, index_name: &str, range: &KeyRange) -> Result<Vec<Key>> {
        self.inner.index_max_keys(table, index_name, range)
    }

    fn index_min_key(&mut self, table: &str, index_name: &str, range: &KeyRange) -> Result<Option<Key>> {
        self.inner.index_min_key(table, index_name, range)
    }

    fn index_max_key(&mut self, table: &str, index_name: &str, range: &KeyRange) -> Result<Option<Key>> {
        self.inner.index_max_key(table, index_name, range)
    }

    fn key_stream(
        &mut self,
        table: &str,
        range: &KeyRange,
        ascending: bool,
        visit: &mut dyn FnMut(&Key) -> bool,
    ) -> Result<()> {
        self.inner.key_stream(table, range, ascending, visit)
    }

    fn value_stream(
        &mut self,
        table: &str,
        range: &KeyRange,
        ascending: bool,
        visit: &mut dyn FnMut(&Key, &Value) -> bool,
    ) -> Result<()> {
        self.inner.value_stream(table, range, ascending, visit)
    }

    fn apply(&mut self, batch: BackendBatch) -> Result<()> {
        self.reconcile(&batch);
        self.inner.apply(batch)
    }

    fn apply_combined(&mut self, batches: Vec<BackendBatch>) -> Result<()> {
        for batch in &batches {
            self.reconcile(batch);
        }
        self.inner.apply_combined(batches)
    }

    fn truncate(&mut self, table: &str) -> Result<()> {
        self.caches.remove(table);
        self.inner.truncate(table)
    }

    fn close(&mut self) -> Result<()> {
        self.caches.clear();
        self.inner.close()
    }

    fn destroy(&mut self) -> Result<()> {
        self.caches.clear();
        self.inner.destroy()
    }

    fn is_persistent(&self) -> bool {
        self.inner.is_persistent()
    }

    fn snapshot_table(&mut self, table: &str) -> Result<super::TableSnapshot> {
        self.inner.snapshot_table(table)
    }

    fn restore_table(&mut self, table: &str, snapshot: super::TableSnapshot) -> Result<()> {
        self.caches.remove(table);
        self.inner.restore_table(table, snapshot)
    }
}

impl<B: Backend> CachedBackend<B> {
    /// Keep the cache from going stale across a batch commit: a
    /// truncate drops the whole table's cache, removed/overwritten
    /// keys are evicted rather than refreshed, since the next `get`
    /// will repopulate them from the backend on demand.
    fn reconcile(&mut self, batch: &BackendBatch) {
        if batch.truncated {
            self.caches.remove(&batch.table);
            return;
        }
        for key in &batch.removed {
            self.evict(&batch.table, key);
        }
        for (key, _) in &batch.modified {
            self.evict(&batch.table, key);
        }
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
