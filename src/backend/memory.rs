//! A reference in-memory [`Backend`] (§6's expansion): a plain ordered
//! map per table plus its secondary indices, with no durability claim.
//! It exists so the transactional core can be exercised end to end
//! without an external engine, and it is what this crate's own
//! integration tests run against.

use std::collections::HashMap;

use log::debug;

use crate::btree::OrderedIndex;
use crate::error::err_at;
use crate::key::{Key, Value};
use crate::key_range::KeyRange;
use crate::memindex::InMemoryIndex;
use crate::Result;

use super::{Backend, BackendBatch};

struct Table {
    primary: OrderedIndex<Value>,
    indices: HashMap<String, InMemoryIndex>,
}

impl Table {
    fn new() -> Table {
        Table {
            primary: OrderedIndex::new(),
            indices: HashMap::new(),
        }
    }
}

/// `Backend` implementation holding everything in process memory.
#[derive(Default)]
pub struct MemoryBackend {
    tables: HashMap<String, Table>,
}

impl MemoryBackend {
    pub fn new() -> MemoryBackend {
        MemoryBackend::default()
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut Table> {
        match self.tables.get_mut(table) {
            Some(t) => Ok(t),
            None => err_at!(NotConnected, msg: "no such table {}", table),
        }
    }

    fn table(&self, table: &str) -> Result<&Table> {
        match self.tables.get(table) {
            Some(t) => Ok(t),
            None => err_at!(NotConnected, msg: "no such table {}", table),
        }
    }
}

impl Backend for MemoryBackend {
    fn create_table(&mut self, table: &str) -> Result<()> {
        self.tables.entry(table.to_string()).or_insert_with(Table::new);
        Ok(())
    }

    fn delete_table(&mut self, table: &str) -> Result<()> {
        self.tables.remove(table);
        Ok(())
    }

    fn create_index(&mut self, table: &str, def: crate::memindex::IndexDef) -> Result<()> {
        let name = def.name.clone();
        let t = self.table_mut(table)?;
        t.indices.insert(name, InMemoryIndex::new(def));
        Ok(())
    }

    fn delete_index(&mut self, table: &str, index_name: &str) -> Result<()> {
        let t = self.table_mut(table)?;
        t.indices.remove(index_name);
        Ok(())
    }

    fn get(&mut self, table: &str, key: &Key) -> Result<Option<Value>> {
        Ok(self.table(table)?.primary.get(key).cloned())
    }

    fn put(&mut self, table: &str, key: Key, value: Value) -> Result<()> {
        let old = self.table(table)?.primary.get(&key).cloned();
        for idx in self.table_mut(table)?.indices.values_mut() {
            idx.put(&key, &value, old.as_ref())?;
        }
        self.table_mut(table)?.primary.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, table: &str, key: &Key) -> Result<()> {
        let old = self.table(table)?.primary.get(key).cloned();
        if let Some(old) = old {
            for idx in self.table_mut(table)?.indices.values_mut() {
                idx.remove(key, &old);
            }
            self.table_mut(table)?.primary.remove(key);
        }
        Ok(())
    }

    fn keys(&mut self, table: &str, range: &KeyRange) -> Result<Vec<Key>> {
        Ok(self
            .table(table)?
            .primary
            .range(range)
            .into_iter()
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn values(&mut self, table: &str, range: &KeyRange) -> Result<Vec<Value>> {
        Ok(self
            .table(table)?
            .primary
            .range(range)
            .into_iter()
            .map(|(_, v)| v.clone())
            .collect())
    }

    fn min_key(&mut self, table: &str, range: &KeyRange) -> Result<Option<Key>> {
        Ok(self.table(table)?.primary.range(range).first().map(|(k, _)| (*k).clone()))
    }

    fn max_key(&mut self, table: &str, range: &KeyRange) -> Result<Option<Key>> {
        Ok(self.table(table)?.primary.range(range).last().map(|(k, _)| (*k).clone()))
    }

    fn min_value(&mut self, table: &str, range: &KeyRange) -> Result<Option<Value>> {
        Ok(self.table(table)?.primary.range(range).first().map(|(_, v)| (*v).clone()))
    }

    fn max_value(&mut self, table: &str, range: &KeyRange) -> Result<Option<Value>> {
        Ok(self.table(table)?.primary.range(range).last().map(|(_, v)| (*v).clone()))
    }

    fn count(&mut self, table: &str, range: &KeyRange) -> Result<usize> {
        Ok(self.table(table)?.primary.range(range).len())
    }

    fn index_keys(
        &mut self,
        table: &str,
        index_name: &str,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> Result<Vec<Key>> {
        let t = self.table(table)?;
        match t.indices.get(index_name) {
            Some(idx) => Ok(idx.keys(range, limit)),
            None => err_at!(InvalidArguments, msg: "no such index {} on {}", index_name, table),
        }
    }

    fn index_min_keys(&mut self, table: &str, index_name: &str, range: &KeyRange) -> Result<Vec<Key>> {
        let t = self.table(table)?;
        match t.indices.get(index_name) {
            Some(idx) => Ok(idx.min_keys(range)),
            None => err_at!(InvalidArguments, msg: "no such index {} on {}", index_name, table),
        }
    }

    fn index_max_keys(&mut self, table: &str, index_name: &str, range: &KeyRange) -> Result<Vec<Key>> {
        let t = self.table(table)?;
        match t.indices.get(index_name) {
            Some(idx) => Ok(idx.max_keys(range)),
            None => err_at!(InvalidArguments, msg: "no such index {} on {}", index_name, table),
        }
    }

    fn index_min_key(&mut self, table: &str, index_name: &str, range: &KeyRange) -> Result<Option<Key>> {
        let t = self.table(table)?;
        match t.indices.get(index_name) {
            Some(idx) => Ok(idx.min_key(range)),
            None => err_at!(InvalidArguments, msg: "no such index {} on {}", index_name, table),
        }
    }

    fn index_max_key(&mut self, table: &str, index_name: &str, range: &KeyRange) -> Result<Option<Key>> {
        let t = self.table(table)?;
        match t.indices.get(index_name) {
            Some(idx) => Ok(idx.max_key(range)),
            None => err_at!(InvalidArguments, msg: "no such index {} on {}", index_name, table),
        }
    }

    fn key_stream(
        &mut self,
        table: &str,
        range: &KeyRange,
        ascending: bool,
        visit: &mut dyn FnMut(&Key) -> bool,
    ) -> Result<()> {
        let mut entries = self.table(table)?.primary.range(range);
        if !ascending {
            entries.reverse();
        }
        for (k, _) in entries {
            if !visit(k) {
                break;
            }
        }
        Ok(())
    }

    fn value_stream(
        &mut self,
        table: &str,
        range: &KeyRange,
        ascending: bool,
        visit: &mut dyn FnMut(&Key, &Value) -> bool,
    ) -> Result<()> {
        let mut entries = self.table(table)?.primary.range(range);
        if !ascending {
            entries.reverse();
        }
        for (k, v) in entries {
            if !visit(k, v) {
                break;
            }
        }
        Ok(())
    }

    fn apply(&mut self, batch: BackendBatch) -> Result<()> {
        apply_one(self.table_mut(&batch.table)?, batch);
        Ok(())
    }

    fn apply_combined(&mut self, batches: Vec<BackendBatch>) -> Result<()> {
        // All tables are validated up front so a missing table aborts
        // before any batch is applied, keeping the combined commit
        // atomic even though this in-memory backend has no real
        // rollback log.
        for batch in &batches {
            self.table(&batch.table)?;
        }
        for batch in batches {
            let table = batch.table.clone();
            debug!("applying combined batch for table {}", table);
            apply_one(self.tables.get_mut(&table).unwrap(), batch);
        }
        Ok(())
    }

    fn truncate(&mut self, table: &str) -> Result<()> {
        let t = self.table_mut(table)?;
        t.primary = OrderedIndex::new();
        for idx in t.indices.values_mut() {
            idx.clear();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        self.tables.clear();
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }

    fn snapshot_table(&mut self, table: &str) -> Result<super::TableSnapshot> {
        let t = self.table(table)?;
        let rows = t
            .primary
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let indices = t.indices.iter().map(|(name, idx)| (name.clone(), idx.dump())).collect();
        Ok(super::TableSnapshot { rows, indices })
    }

    fn restore_table(&mut self, table: &str, snapshot: super::TableSnapshot) -> Result<()> {
        let t = self.table_mut(table)?;
        t.primary = OrderedIndex::new();
        for (k, v) in snapshot.rows {
            t.primary.insert(k, v);
        }
        for (name, pairs) in snapshot.indices {
            if let Some(idx) = t.indices.get_mut(&name) {
                idx.restore(pairs);
            }
        }
        Ok(())
    }
}

fn apply_one(table: &mut Table, batch: BackendBatch) {
    if batch.truncated {
        table.primary = OrderedIndex::new();
        for idx in table.indices.values_mut() {
            idx.clear();
        }
    }
    for key in &batch.removed {
        table.primary.remove(key);
    }
    for (key, value) in batch.modified {
        table.primary.insert(key, value);
    }
    for delta in batch.index_deltas {
        if let Some(idx) = table.indices.get_mut(&delta.index_name) {
            if delta.truncated {
                idx.clear();
            }
            for (sk, pk) in &delta.removed {
                idx.apply_remove(sk, pk);
            }
            for (sk, pk) in delta.inserted {
                // A batch is produced by code that already checked
                // uniqueness at commit time; an error here would mean
                // that check was skipped.
                let _ = idx.apply_insert(sk, pk);
            }
        }
    }
}
