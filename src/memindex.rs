//! §4.2 `InMemoryIndex`: extracts secondary keys from values by key
//! path, honors multi-entry/unique constraints, and forwards ordered
//! queries to the [`OrderedIndex`].

use std::collections::BTreeSet;

use crate::btree::OrderedIndex;
use crate::error::err_at;
use crate::key::{extract_secondary_keys, Key, KeyPath, Value};
use crate::key_range::KeyRange;
use crate::Result;

/// What a secondary key maps to: a single primary key for unique
/// indices, or a non-empty, primary-key-ordered set for non-unique
/// ones. Never a duplicate tree entry for the same secondary key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    One(Key),
    Many(BTreeSet<Key>),
}

impl Record {
    fn primary_keys(&self) -> Vec<Key> {
        match self {
            Record::One(k) => vec![k.clone()],
            Record::Many(set) => set.iter().cloned().collect(),
        }
    }
}

pub struct IndexDef {
    pub name: String,
    pub key_path: KeyPath,
    pub multi_entry: bool,
    pub unique: bool,
}

/// A secondary index held entirely in memory (as opposed to the
/// persisted copy a backend keeps). Used both standalone by the
/// reference in-memory backend and as the "new entries" side of a
/// [`crate::txindex::TransactionIndex`] overlay.
pub struct InMemoryIndex {
    def: IndexDef,
    tree: OrderedIndex<Record>,
}

impl InMemoryIndex {
    pub fn new(def: IndexDef) -> InMemoryIndex {
        InMemoryIndex {
            def,
            tree: OrderedIndex::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    fn secondary_keys(&self, value: &Value) -> Vec<Key> {
        extract_secondary_keys(&self.def.key_path, value, self.def.multi_entry)
    }

    /// Reflect a primary-key write: compute the old and new secondary
    /// keys and update only the entries that actually changed.
    pub fn put(&mut self, primary_key: &Key, value: &Value, old_value: Option<&Value>) -> Result<()> {
        let new_keys: BTreeSet<Key> = self.secondary_keys(value).into_iter().collect();
        let old_keys: BTreeSet<Key> = old_value
            .map(|v| self.secondary_keys(v).into_iter().collect())
            .unwrap_or_default();

        if new_keys == old_keys {
            return Ok(());
        }

        for sk in old_keys.difference(&new_keys) {
            self.remove_entry(sk, primary_key);
        }
        for sk in new_keys.difference(&old_keys) {
            self.insert_entry(sk.clone(), primary_key.clone())?;
        }
        Ok(())
    }

    pub fn remove(&mut self, primary_key: &Key, old_value: &Value) {
        for sk in self.secondary_keys(old_value) {
            self.remove_entry(&sk, primary_key);
        }
    }

    /// Drop every entry, as `truncate()` does to the owning table.
    pub fn clear(&mut self) {
        self.tree = OrderedIndex::new();
    }

    /// Every `(secondary_key, primary_key)` pair currently held,
    /// flattening non-unique ties into one pair per primary key. Used
    /// to snapshot an index's full content for later restoration,
    /// since `IndexDelta` only ever carries the pairs one write
    /// touched, not the whole index.
    pub(crate) fn dump(&self) -> Vec<(Key, Key)> {
        let mut out = vec![];
        for (sk, record) in self.tree.iter() {
            for pk in record.primary_keys() {
                out.push((sk.clone(), pk));
            }
        }
        out
    }

    /// Replace the whole index's content with `pairs`, as produced by
    /// [`InMemoryIndex::dump`]. Bypasses uniqueness checks: the pairs
    /// came from a previously-valid index state.
    pub(crate) fn restore(&mut self, pairs: Vec<(Key, Key)>) {
        self.tree = OrderedIndex::new();
        for (sk, pk) in pairs {
            let _ = self.insert_entry(sk, pk);
        }
    }

    /// Apply one secondary/primary-key pair recorded in a
    /// [`crate::backend::IndexDelta`], bypassing value-based secondary
    /// key extraction — the batch already carries the extracted keys.
    pub fn apply_insert(&mut self, secondary_key: Key, primary_key: Key) -> Result<()> {
        self.insert_entry(secondary_key, primary_key)
    }

    pub fn apply_remove(&mut self, secondary_key: &Key, primary_key: &Key) {
        self.remove_entry(secondary_key, primary_key)
    }

    fn insert_entry(&mut self, secondary_key: Key, primary_key: Key) -> Result<()> {
        if self.def.unique {
            if let Some(existing) = self.tree.get(&secondary_key) {
                if existing.primary_keys() != vec![primary_key.clone()] {
                    return err_at!(
                        UniqueConstraintViolation,
                        msg: "index {} already has an entry for secondary key {:?}",
                        self.def.name,
                        secondary_key
                    );
                }
            }
            self.tree.insert(secondary_key, Record::One(primary_key));
        } else {
            match self.tree.get(&secondary_key) {
                Some(Record::Many(set)) => {
                    let mut set = set.clone();
                    set.insert(primary_key);
                    self.tree.insert(secondary_key, Record::Many(set));
                }
                Some(Record::One(existing)) => {
                    let mut set = BTreeSet::new();
                    set.insert(existing.clone());
                    set.insert(primary_key);
                    self.tree.insert(secondary_key, Record::Many(set));
                }
                None => {
                    let mut set = BTreeSet::new();
                    set.insert(primary_key);
                    self.tree.insert(secondary_key, Record::Many(set));
                }
            }
        }
        Ok(())
    }

    fn remove_entry(&mut self, secondary_key: &Key, primary_key: &Key) {
        match self.tree.get(secondary_key) {
            Some(Record::One(existing)) if existing == primary_key => {
                self.tree.remove(secondary_key);
            }
            Some(Record::Many(set)) => {
                let mut set = set.clone();
                set.remove(primary_key);
                if set.is_empty() {
                    self.tree.remove(secondary_key);
                } else if set.len() == 1 {
                    let only = set.into_iter().next().unwrap();
                    self.tree.insert(secondary_key.clone(), Record::One(only));
                } else {
                    self.tree.insert(secondary_key.clone(), Record::Many(set));
                }
            }
            _ => (),
        }
    }

    /// Matching primary keys, ascending by secondary key then
    /// primary-key order within a tie group. Short-circuits through
    /// `seek` for an exact-match range.
    pub fn keys(&self, range: &KeyRange, limit: Option<usize>) -> Vec<Key> {
        let mut out = vec![];
        if let Some(exact) = range.is_exact() {
            if let Some(record) = self.tree.get(exact) {
                out.extend(record.primary_keys());
            }
        } else {
            for (_, record) in self.tree.range(range) {
                out.extend(record.primary_keys());
                if let Some(limit) = limit {
                    if out.len() >= limit {
                        out.truncate(limit);
                        return out;
                    }
                }
            }
        }
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }

    pub fn values(
        &self,
        range: &KeyRange,
        limit: Option<usize>,
        resolve: impl Fn(&Key) -> Option<Value>,
    ) -> Vec<Value> {
        self.keys(range, limit)
            .iter()
            .filter_map(|k| resolve(k))
            .collect()
    }

    /// Primary keys bound to the smallest secondary key inside
    /// `range` (the whole tie group, if any).
    pub fn min_keys(&self, range: &KeyRange) -> Vec<Key> {
        match self.tree.range(range).into_iter().next() {
            Some((_, record)) => record.primary_keys(),
            None => vec![],
        }
    }

    /// Primary keys bound to the largest secondary key inside `range`.
    pub fn max_keys(&self, range: &KeyRange) -> Vec<Key> {
        match self.tree.range(range).into_iter().last() {
            Some((_, record)) => record.primary_keys(),
            None => vec![],
        }
    }

    /// The smallest/largest secondary key itself inside `range`,
    /// distinct from `min_keys`/`max_keys` which resolve to the
    /// primary keys tied to it.
    pub fn min_key(&self, range: &KeyRange) -> Option<Key> {
        self.tree.range(range).into_iter().next().map(|(k, _)| k.clone())
    }

    pub fn max_key(&self, range: &KeyRange) -> Option<Key> {
        self.tree.range(range).into_iter().last().map(|(k, _)| k.clone())
    }

    pub fn min_values(&self, range: &KeyRange, resolve: impl Fn(&Key) -> Option<Value>) -> Vec<Value> {
        self.min_keys(range).iter().filter_map(|k| resolve(k)).collect()
    }

    pub fn max_values(&self, range: &KeyRange, resolve: impl Fn(&Key) -> Option<Value>) -> Vec<Value> {
        self.max_keys(range).iter().filter_map(|k| resolve(k)).collect()
    }

    pub fn count(&self, range: &KeyRange) -> usize {
        self.keys(range, None).len()
    }
}

#[cfg(test)]
#[path = "memindex_test.rs"]
mod memindex_test;
