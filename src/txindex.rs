//! §4.3 `TransactionIndex`: an overlay over one backend-resident
//! secondary index, reflecting a transaction's own modified/removed/
//! truncated state without mutating the backend until commit.

use std::collections::BTreeSet;

use crate::backend::{Backend, IndexDelta};
use crate::key::{extract_secondary_keys, Key, Value};
use crate::key_range::KeyRange;
use crate::memindex::{IndexDef, InMemoryIndex};
use crate::Result;

/// Overlay over `table`'s `index_name` secondary index. `new_side`
/// mirrors every entry this transaction has produced so reads can be
/// answered without touching the backend; `removed`/`inserted` are
/// the raw secondary/primary-key pairs to replay onto the backend's
/// own persisted index at commit time (a pair can originate from a
/// value that only ever existed in the backend, so it cannot always
/// be recovered from `new_side` alone).
pub struct TransactionIndex {
    table: String,
    index_name: String,
    new_side: InMemoryIndex,
    removed: Vec<(Key, Key)>,
    inserted: Vec<(Key, Key)>,
}

impl TransactionIndex {
    pub fn new(table: impl Into<String>, def: IndexDef) -> TransactionIndex {
        TransactionIndex {
            table: table.into(),
            index_name: def.name.clone(),
            new_side: InMemoryIndex::new(def),
            removed: vec![],
            inserted: vec![],
        }
    }

    pub fn def(&self) -> &IndexDef {
        self.new_side.def()
    }

    fn secondary_keys(&self, value: &Value) -> Vec<Key> {
        extract_secondary_keys(&self.def().key_path, value, self.def().multi_entry)
    }

    /// Mirrors a primary-key write: diffs the old/new secondary-key
    /// sets, updates the read-side tree, and records the raw pairs
    /// that must be replayed onto the backend at commit.
    pub fn put(&mut self, primary_key: &Key, value: &Value, old_value: Option<&Value>) -> Result<()> {
        let new_keys: BTreeSet<Key> = self.secondary_keys(value).into_iter().collect();
        let old_keys: BTreeSet<Key> = old_value
            .map(|v| self.secondary_keys(v).into_iter().collect())
            .unwrap_or_default();
        if new_keys == old_keys {
            return Ok(());
        }
        for sk in old_keys.difference(&new_keys) {
            self.removed.push((sk.clone(), primary_key.clone()));
        }
        for sk in new_keys.difference(&old_keys) {
            self.inserted.push((sk.clone(), primary_key.clone()));
        }
        self.new_side.put(primary_key, value, old_value)
    }

    pub fn remove(&mut self, primary_key: &Key, old_value: &Value) {
        for sk in self.secondary_keys(old_value) {
            self.removed.push((sk, primary_key.clone()));
        }
        self.new_side.remove(primary_key, old_value);
    }

    pub fn clear(&mut self) {
        self.new_side.clear();
        self.removed.clear();
        self.inserted.clear();
    }

    /// Folds another overlay's (typically a just-committed nested
    /// child's) accumulated changes into this one, replaying its raw
    /// pairs rather than re-extracting from values it no longer has.
    pub fn merge_from(&mut self, other: &mut TransactionIndex) {
        for (sk, pk) in std::mem::take(&mut other.removed) {
            self.new_side.apply_remove(&sk, &pk);
            self.removed.push((sk, pk));
        }
        for (sk, pk) in std::mem::take(&mut other.inserted) {
            let _ = self.new_side.apply_insert(sk.clone(), pk.clone());
            self.inserted.push((sk, pk));
        }
    }

    /// Drains the accumulated pairs into a batch-ready [`IndexDelta`].
    pub fn take_delta(&mut self, truncated: bool) -> IndexDelta {
        IndexDelta {
            index_name: self.index_name.clone(),
            truncated,
            removed: std::mem::take(&mut self.removed),
            inserted: std::mem::take(&mut self.inserted),
        }
    }

    /// `(backendKeys ∪ newKeys) \ removed \ modifiedKeys`. `backend`
    /// is skipped entirely when `truncated` is set, per §4.3.
    pub fn keys(
        &self,
        backend: &mut dyn Backend,
        range: &KeyRange,
        truncated: bool,
        removed: &BTreeSet<Key>,
        modified: &BTreeSet<Key>,
    ) -> Result<Vec<Key>> {
        let mut out: BTreeSet<Key> = BTreeSet::new();
        if !truncated {
            for k in backend.index_keys(&self.table, &self.index_name, range, None)? {
                out.insert(k);
            }
        }
        for k in self.new_side.keys(range, None) {
            out.insert(k);
        }
        for k in removed {
            out.remove(k);
        }
        for k in modified {
            out.remove(k);
        }
        Ok(out.into_iter().collect())
    }

    pub fn count(
        &self,
        backend: &mut dyn Backend,
        range: &KeyRange,
        truncated: bool,
        removed: &BTreeSet<Key>,
        modified: &BTreeSet<Key>,
    ) -> Result<usize> {
        Ok(self.keys(backend, range, truncated, removed, modified)?.len())
    }

    /// Smallest/largest surviving key inside `range`: whichever of the
    /// backend's or the overlay's own extremal secondary key is more
    /// extreme wins outright; the two sides' primary keys are unioned
    /// only when both extremes tie exactly.
    pub fn min_keys(
        &self,
        backend: &mut dyn Backend,
        range: &KeyRange,
        truncated: bool,
        removed: &BTreeSet<Key>,
        modified: &BTreeSet<Key>,
    ) -> Result<Vec<Key>> {
        self.extremal_keys(backend, range, truncated, removed, modified, true)
    }

    pub fn max_keys(
        &self,
        backend: &mut dyn Backend,
        range: &KeyRange,
        truncated: bool,
        removed: &BTreeSet<Key>,
        modified: &BTreeSet<Key>,
    ) -> Result<Vec<Key>> {
        self.extremal_keys(backend, range, truncated, removed, modified, false)
    }

    fn extremal_keys(
        &self,
        backend: &mut dyn Backend,
        range: &KeyRange,
        truncated: bool,
        removed: &BTreeSet<Key>,
        modified: &BTreeSet<Key>,
        want_min: bool,
    ) -> Result<Vec<Key>> {
        let survives = |pks: &[Key]| -> Vec<Key> {
            pks.iter()
                .filter(|pk| !removed.contains(pk) && !modified.contains(pk))
                .cloned()
                .collect()
        };

        let (backend_secondary, backend_side) = if truncated {
            (None, vec![])
        } else {
            let secondary = if want_min {
                backend.index_min_key(&self.table, &self.index_name, range)?
            } else {
                backend.index_max_key(&self.table, &self.index_name, range)?
            };
            let pks = if want_min {
                backend.index_min_keys(&self.table, &self.index_name, range)?
            } else {
                backend.index_max_keys(&self.table, &self.index_name, range)?
            };
            (secondary, survives(&pks))
        };

        let new_secondary = if want_min {
            self.new_side.min_key(range)
        } else {
            self.new_side.max_key(range)
        };
        let new_side = if want_min {
            self.new_side.min_keys(range)
        } else {
            self.new_side.max_keys(range)
        };

        // A side whose backing primary keys were all filtered out by
        // removed/modified no longer has a real candidate, regardless
        // of what its secondary key was.
        let backend_secondary = if backend_side.is_empty() { None } else { backend_secondary };
        let new_secondary = if new_side.is_empty() { None } else { new_secondary };

        let more_extreme = |a: &Key, b: &Key| if want_min { a < b } else { a > b };

        match (backend_secondary, new_secondary) {
            (None, None) => Ok(vec![]),
            (Some(_), None) => Ok(backend_side),
            (None, Some(_)) => Ok(new_side),
            (Some(ref a), Some(ref b)) if a == b => {
                Ok(backend_side.into_iter().chain(new_side).collect())
            }
            (Some(ref a), Some(ref b)) if more_extreme(a, b) => Ok(backend_side),
            (Some(_), Some(_)) => Ok(new_side),
        }
    }

    /// `checkUniqueConstraint`: confirms the backend has zero entries
    /// for this exact secondary key. Duplication against the
    /// transaction's own new entries is caught by `InMemoryIndex`
    /// itself at insertion time.
    pub fn check_unique_constraint(&self, backend: &mut dyn Backend, secondary_key: &Key) -> Result<bool> {
        let existing = backend.index_keys(
            &self.table,
            &self.index_name,
            &KeyRange::only(secondary_key.clone()),
            None,
        )?;
        Ok(existing.is_empty())
    }
}

#[cfg(test)]
#[path = "txindex_test.rs"]
mod txindex_test;
