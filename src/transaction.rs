//! §4.5 `Transaction`: a copy-on-write overlay over a parent state
//! (the backend, or another transaction's committed layer), with a
//! small lifecycle state machine and write-set bookkeeping.
//!
//! A nested child (`transaction()`) shares its parent's live overlay
//! through an `Rc<RefCell<_>>` rather than holding a reference to the
//! parent `Transaction` itself — the parent is blocked (`NESTED`)
//! while a child is open, so nothing else observes the overlay in the
//! meantime, and the child's commit is simply folding its own overlay
//! into that shared cell.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use log::{debug, trace};

use crate::backend::{BackendBatch, IndexDelta};
use crate::error::err_at;
use crate::key::{Key, Value};
use crate::key_range::KeyRange;
use crate::object_store::{ObjectStore, StateId};
use crate::txindex::TransactionIndex;
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    Open,
    Committed,
    Aborted,
    Conflicted,
    Nested,
}

/// Everything a transaction accumulates before it commits: the
/// overwritten keys, the deleted keys, whether a `truncate()` cleared
/// everything first, and the per-index overlays kept in lockstep.
pub(crate) struct Overlay {
    pub modified: BTreeMap<Key, Value>,
    pub removed: BTreeSet<Key>,
    pub truncated: bool,
    pub indices: HashMap<String, TransactionIndex>,
}

impl Overlay {
    fn new(indices: HashMap<String, TransactionIndex>) -> Overlay {
        Overlay {
            modified: BTreeMap::new(),
            removed: BTreeSet::new(),
            truncated: false,
            indices,
        }
    }
}

pub struct Transaction {
    pub(crate) id: u64,
    table: String,
    pub(crate) base: StateId,
    store: Arc<Mutex<ObjectStore>>,
    state: TxState,
    overlay: Rc<RefCell<Overlay>>,
    /// Set only for a nested child: the parent's own live overlay,
    /// consulted (read-only, until this child commits) between this
    /// child's own overlay and the shared base state.
    parent: Option<Rc<RefCell<Overlay>>>,
    /// Shared with at most one open child; the child clears it when
    /// it leaves the OPEN state, letting the parent lazily return to
    /// OPEN the next time it is touched.
    child_open: Option<Rc<Cell<bool>>>,
    as_child_flag: Option<Rc<Cell<bool>>>,
}

impl Transaction {
    pub(crate) fn new(
        id: u64,
        table: String,
        base: StateId,
        store: Arc<Mutex<ObjectStore>>,
        indices: HashMap<String, TransactionIndex>,
    ) -> Transaction {
        Transaction {
            id,
            table,
            base,
            store,
            state: TxState::Open,
            overlay: Rc::new(RefCell::new(Overlay::new(indices))),
            parent: None,
            child_open: None,
            as_child_flag: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    pub(crate) fn store_arc(&self) -> Arc<Mutex<ObjectStore>> {
        self.store.clone()
    }

    /// Set by [`crate::combined::commit_combined`] once every
    /// participant's batch has been applied.
    pub(crate) fn mark_committed(&mut self) {
        self.state = TxState::Committed;
    }

    fn sync_child_state(&mut self) {
        if self.state == TxState::Nested {
            if let Some(flag) = &self.child_open {
                if !flag.get() {
                    self.state = TxState::Open;
                    self.child_open = None;
                }
            }
        }
    }

    pub fn state(&mut self) -> TxState {
        self.sync_child_state();
        self.state
    }

    fn ensure_open(&mut self) -> Result<()> {
        self.sync_child_state();
        match self.state {
            TxState::Open => Ok(()),
            TxState::Nested => err_at!(NestedTransactionBlocked, msg: "tx {} has an open child", self.id),
            _ => err_at!(TransactionClosed, msg: "tx {} is not open", self.id),
        }
    }

    pub fn get(&self, key: &Key) -> Result<Option<Value>> {
        {
            let ov = self.overlay.borrow();
            if let Some(v) = ov.modified.get(key) {
                return Ok(Some(v.clone()));
            }
            if ov.removed.contains(key) || ov.truncated {
                return Ok(None);
            }
        }
        if let Some(parent) = &self.parent {
            let ov = parent.borrow();
            if let Some(v) = ov.modified.get(key) {
                return Ok(Some(v.clone()));
            }
            if ov.removed.contains(key) || ov.truncated {
                return Ok(None);
            }
        }
        let store = self.store.lock().unwrap();
        store.read_through(self.base, key)
    }

    pub fn put(&mut self, key: Key, value: Value) -> Result<()> {
        self.ensure_open()?;
        let old = self.get(&key)?;
        let mut ov = self.overlay.borrow_mut();
        for idx in ov.indices.values_mut() {
            idx.put(&key, &value, old.as_ref())?;
        }
        ov.removed.remove(&key);
        ov.modified.insert(key, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &Key) -> Result<()> {
        self.ensure_open()?;
        let old = self.get(key)?;
        if let Some(old) = old {
            let mut ov = self.overlay.borrow_mut();
            for idx in ov.indices.values_mut() {
                idx.remove(key, &old);
            }
        }
        let mut ov = self.overlay.borrow_mut();
        ov.modified.remove(key);
        ov.removed.insert(key.clone());
        Ok(())
    }

    pub fn truncate(&mut self) -> Result<()> {
        self.ensure_open()?;
        trace!("truncating tx {} over table {}", self.id, self.table);
        let mut ov = self.overlay.borrow_mut();
        ov.modified.clear();
        ov.removed.clear();
        ov.truncated = true;
        for idx in ov.indices.values_mut() {
            idx.clear();
        }
        Ok(())
    }

    fn effective_removed_modified(&self) -> (bool, BTreeSet<Key>, BTreeSet<Key>) {
        let ov = self.overlay.borrow();
        let mut truncated = ov.truncated;
        let mut removed = ov.removed.clone();
        let mut modified: BTreeSet<Key> = ov.modified.keys().cloned().collect();
        if let Some(parent) = &self.parent {
            if !truncated {
                let pv = parent.borrow();
                if pv.truncated {
                    truncated = true;
                }
                removed.extend(pv.removed.iter().cloned());
                modified.extend(pv.modified.keys().cloned());
            }
        }
        (truncated, removed, modified)
    }

    pub fn keys(&self, range: &KeyRange) -> Result<Vec<Key>> {
        let (truncated, removed, modified) = self.effective_removed_modified();
        let mut out: BTreeSet<Key> = BTreeSet::new();
        if !truncated {
            let store = self.store.lock().unwrap();
            out.extend(store.read_through_keys(self.base, range)?);
        }
        for k in &removed {
            out.remove(k);
        }
        for k in &modified {
            out.remove(k);
        }
        let ov = self.overlay.borrow();
        for k in ov.modified.keys() {
            if range.contains(k) {
                out.insert(k.clone());
            }
        }
        drop(ov);
        if let Some(parent) = &self.parent {
            let pv = parent.borrow();
            for k in pv.modified.keys() {
                if range.contains(k) && !self.overlay.borrow().removed.contains(k) {
                    out.insert(k.clone());
                }
            }
        }
        Ok(out.into_iter().collect())
    }

    pub fn values(&self, range: &KeyRange) -> Result<Vec<Value>> {
        self.keys(range)?
            .into_iter()
            .map(|k| Ok(self.get(&k)?.unwrap()))
            .collect()
    }

    pub fn min_key(&self, range: &KeyRange) -> Result<Option<Key>> {
        Ok(self.keys(range)?.into_iter().next())
    }

    pub fn max_key(&self, range: &KeyRange) -> Result<Option<Key>> {
        Ok(self.keys(range)?.into_iter().last())
    }

    pub fn min_value(&self, range: &KeyRange) -> Result<Option<Value>> {
        match self.min_key(range)? {
            Some(k) => self.get(&k),
            None => Ok(None),
        }
    }

    pub fn max_value(&self, range: &KeyRange) -> Result<Option<Value>> {
        match self.max_key(range)? {
            Some(k) => self.get(&k),
            None => Ok(None),
        }
    }

    pub fn count(&self, range: &KeyRange) -> Result<usize> {
        Ok(self.keys(range)?.len())
    }

    /// §4.4's `Query::range`/`::min`/`::max` entry point: queries one
    /// secondary index through this transaction's overlay. A nested
    /// child only sees its own new entries plus the backend — not its
    /// still-open parent's uncommitted index changes, since the
    /// parent's overlay index is merged in only once the child
    /// commits (see `DESIGN.md`).
    pub fn index_keys(&self, index_name: &str, range: &KeyRange) -> Result<Vec<Key>> {
        self.with_index(index_name, |idx, backend, truncated, removed, modified| {
            idx.keys(backend, range, truncated, removed, modified)
        })
    }

    pub fn index_min_keys(&self, index_name: &str) -> Result<Vec<Key>> {
        self.with_index(index_name, |idx, backend, truncated, removed, modified| {
            idx.min_keys(backend, &KeyRange::all(), truncated, removed, modified)
        })
    }

    pub fn index_max_keys(&self, index_name: &str) -> Result<Vec<Key>> {
        self.with_index(index_name, |idx, backend, truncated, removed, modified| {
            idx.max_keys(backend, &KeyRange::all(), truncated, removed, modified)
        })
    }

    fn with_index<F>(&self, index_name: &str, f: F) -> Result<Vec<Key>>
    where
        F: FnOnce(&TransactionIndex, &mut dyn crate::backend::Backend, bool, &BTreeSet<Key>, &BTreeSet<Key>) -> Result<Vec<Key>>,
    {
        let (truncated, removed, modified) = self.effective_removed_modified();
        let backend_handle = self.store.lock().unwrap().backend_handle();
        let mut backend = backend_handle.lock().unwrap();
        let ov = self.overlay.borrow();
        match ov.indices.get(index_name) {
            Some(idx) => f(idx, &mut *backend, truncated, &removed, &modified),
            None => err_at!(InvalidArguments, msg: "no such index {} on table {}", index_name, self.table),
        }
    }

    /// Builds this transaction's flattened [`BackendBatch`], draining
    /// every overlay index's accumulated pairs. Only meaningful for a
    /// top-level transaction about to commit through its object store.
    pub(crate) fn to_batch(&self) -> BackendBatch {
        let mut ov = self.overlay.borrow_mut();
        let truncated = ov.truncated;
        let index_deltas: Vec<IndexDelta> = ov
            .indices
            .values_mut()
            .map(|idx| idx.take_delta(truncated))
            .collect();
        BackendBatch {
            table: self.table.clone(),
            truncated,
            removed: ov.removed.iter().cloned().collect(),
            modified: ov.modified.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            index_deltas,
        }
    }

    pub fn commit(&mut self) -> Result<bool> {
        self.ensure_open()?;
        if let Some(parent) = self.parent.clone() {
            let mut p = parent.borrow_mut();
            let mut child = self.overlay.borrow_mut();
            merge_overlay(&mut p, &mut child);
            drop(child);
            drop(p);
            if let Some(flag) = &self.as_child_flag {
                flag.set(false);
            }
            self.state = TxState::Committed;
            debug!("nested tx {} merged into parent", self.id);
            return Ok(true);
        }
        let store = self.store.clone();
        let ok = store.lock().unwrap().commit(self)?;
        self.state = if ok { TxState::Committed } else { TxState::Conflicted };
        debug!("tx {} commit -> {}", self.id, ok);
        Ok(ok)
    }

    pub fn abort(&mut self) -> Result<()> {
        if self.state != TxState::Open && self.state != TxState::Nested {
            return err_at!(InvalidState, msg: "tx {} is not open", self.id);
        }
        if self.parent.is_some() {
            if let Some(flag) = &self.as_child_flag {
                flag.set(false);
            }
            self.state = TxState::Aborted;
            return Ok(());
        }
        let store = self.store.clone();
        store.lock().unwrap().abort(self)?;
        self.state = TxState::Aborted;
        Ok(())
    }

    /// Opens a nested child reading through this transaction's own
    /// uncommitted overlay. The parent moves to NESTED until the
    /// child closes.
    pub fn transaction(&mut self) -> Result<Transaction> {
        self.ensure_open()?;
        let flag = Rc::new(Cell::new(true));
        self.child_open = Some(flag.clone());
        self.state = TxState::Nested;

        let (id, indices) = {
            let mut store = self.store.lock().unwrap();
            (store.next_tx_id(), store.child_indices(&self.table))
        };
        Ok(Transaction {
            id,
            table: self.table.clone(),
            base: self.base,
            store: self.store.clone(),
            state: TxState::Open,
            overlay: Rc::new(RefCell::new(Overlay::new(indices))),
            parent: Some(self.overlay.clone()),
            child_open: None,
            as_child_flag: Some(flag),
        })
    }
}

fn merge_overlay(parent: &mut Overlay, child: &mut Overlay) {
    if child.truncated {
        parent.modified.clear();
        parent.removed.clear();
        parent.truncated = true;
        for idx in parent.indices.values_mut() {
            idx.clear();
        }
    }
    for k in std::mem::take(&mut child.removed) {
        parent.modified.remove(&k);
        parent.removed.insert(k);
    }
    for (k, v) in std::mem::take(&mut child.modified) {
        parent.removed.remove(&k);
        parent.modified.insert(k, v);
    }
    for (name, child_idx) in child.indices.iter_mut() {
        if let Some(parent_idx) = parent.indices.get_mut(name) {
            parent_idx.merge_from(child_idx);
        }
    }
}

/// Merges a just-flattened transaction's batch onto the batch below
/// it in the state stack (or the final batch handed to the backend),
/// per §4.6's "truncate propagates through flatten" rule.
pub(crate) fn flatten_onto(base: &mut BackendBatch, applied: BackendBatch) {
    if applied.truncated {
        base.truncated = true;
        base.removed.clear();
        base.modified.clear();
        base.index_deltas.iter_mut().for_each(|d| d.truncated = true);
    }
    for k in &applied.removed {
        base.modified.retain(|(mk, _)| mk != k);
        if !base.removed.contains(k) {
            base.removed.push(k.clone());
        }
    }
    for (k, v) in applied.modified {
        base.removed.retain(|rk| rk != &k);
        base.modified.retain(|(mk, _)| mk != &k);
        base.modified.push((k, v));
    }
    for delta in applied.index_deltas {
        let entry = match base.index_deltas.iter_mut().find(|d| d.index_name == delta.index_name) {
            Some(d) => d,
            None => {
                base.index_deltas.push(IndexDelta {
                    index_name: delta.index_name.clone(),
                    truncated: false,
                    removed: vec![],
                    inserted: vec![],
                });
                base.index_deltas.last_mut().unwrap()
            }
        };
        if delta.truncated {
            entry.truncated = true;
            entry.removed.clear();
            entry.inserted.clear();
        }
        entry.removed.extend(delta.removed);
        entry.inserted.extend(delta.inserted);
    }
}

#[cfg(test)]
#[path = "transaction_test.rs"]
mod transaction_test;
