//! §4.6 `ObjectStore`: the per-table state stack — commit & isolation
//! protocol. Owns the backend handle for one table, the chain of
//! committed-but-unflushed transactions sitting above it, and the
//! bookkeeping (`base`, `open`, `closedBases`) that decides whether a
//! commit is accepted, conflicted, pushed, or flattened.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};

use crate::backend::{Backend, BackendBatch};
use crate::error::err_at;
use crate::key::{Key, Value};
use crate::key_range::KeyRange;
use crate::memindex::IndexDef;
use crate::transaction::{flatten_onto, Transaction};
use crate::txindex::TransactionIndex;
use crate::Result;

const DEFAULT_MAX_STACK_SIZE: usize = 10;

/// Identifies a readable snapshot: the backend itself, or a
/// committed-but-unflushed layer sitting above it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateId {
    Backend,
    Stack(u64),
}

struct StackLayer {
    id: u64,
    base: StateId,
    batch: BackendBatch,
}

pub struct ObjectStore {
    table: String,
    backend: Arc<Mutex<dyn Backend + Send>>,
    index_defs: HashMap<String, IndexDef>,
    stack: Vec<StackLayer>,
    base_of: HashMap<u64, StateId>,
    open_count: HashMap<StateId, u32>,
    closed_bases: HashSet<StateId>,
    next_id: u64,
    max_stack_size: usize,
}

impl ObjectStore {
    pub fn new(table: impl Into<String>, backend: Arc<Mutex<dyn Backend + Send>>) -> ObjectStore {
        ObjectStore {
            table: table.into(),
            backend,
            index_defs: HashMap::new(),
            stack: vec![],
            base_of: HashMap::new(),
            open_count: HashMap::new(),
            closed_bases: HashSet::new(),
            next_id: 1,
            max_stack_size: DEFAULT_MAX_STACK_SIZE,
        }
    }

    pub fn with_max_stack_size(mut self, n: usize) -> ObjectStore {
        self.max_stack_size = n;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn register_index(&mut self, def: IndexDef) -> Result<()> {
        self.backend.lock().unwrap().create_index(&self.table, clone_def(&def))?;
        self.index_defs.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        self.backend.lock().unwrap().delete_index(&self.table, name)?;
        self.index_defs.remove(name);
        Ok(())
    }

    pub(crate) fn backend_handle(&self) -> Arc<Mutex<dyn Backend + Send>> {
        self.backend.clone()
    }

    /// Whether any transaction on this store has neither committed
    /// nor aborted yet — the precondition `Database::close`/`::destroy`
    /// check per §5/§7's `CloseWhileActive`.
    pub(crate) fn has_open_transactions(&self) -> bool {
        !self.base_of.is_empty()
    }

    /// §4.6 precondition only: whether `tx_id`'s base is still live.
    /// Used by [`crate::combined::CombinedTransaction`] to validate
    /// every participant before any backend write happens.
    pub(crate) fn can_commit(&self, tx_id: u64) -> Result<bool> {
        match self.base_of.get(&tx_id) {
            Some(b) => Ok(!self.closed_bases.contains(b)),
            None => err_at!(InvalidState, msg: "tx {} unknown to table {}", tx_id, self.table),
        }
    }

    /// Marks a combined-commit participant's base closed without
    /// pushing a stack layer — the combined commit writes straight to
    /// the backend, so there is nothing to defer.
    pub(crate) fn finalize_direct(&mut self, tx_id: u64) {
        if let Some(b) = self.base_of.remove(&tx_id) {
            self.dec_open(b);
            self.closed_bases.insert(b);
        }
    }

    pub(crate) fn next_tx_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn child_indices(&self, table: &str) -> HashMap<String, TransactionIndex> {
        self.index_defs
            .iter()
            .map(|(name, def)| (name.clone(), TransactionIndex::new(table, clone_def(def))))
            .collect()
    }

    fn current_state(&self) -> StateId {
        self.stack.last().map(|l| StateId::Stack(l.id)).unwrap_or(StateId::Backend)
    }

    fn open_of(&self, id: StateId) -> u32 {
        *self.open_count.get(&id).unwrap_or(&0)
    }

    fn inc_open(&mut self, id: StateId) {
        *self.open_count.entry(id).or_insert(0) += 1;
    }

    fn dec_open(&mut self, id: StateId) {
        if let Some(c) = self.open_count.get_mut(&id) {
            if *c > 0 {
                *c -= 1;
            }
        }
    }

    /// Begins a fresh top-level transaction reading from the current
    /// top of the chain (backend, or the newest stack layer).
    pub fn begin(this: &Arc<Mutex<ObjectStore>>) -> Result<Transaction> {
        let mut store = this.lock().unwrap();
        let base = store.current_state();
        let id = store.next_tx_id();
        store.base_of.insert(id, base);
        store.inc_open(base);
        let indices = store.child_indices(&store.table.clone());
        let table = store.table.clone();
        trace!("tx {} opened on table {} base {:?}", id, table, base);
        Ok(Transaction::new(id, table, base, this.clone(), indices))
    }

    fn layer_pos(&self, id: u64) -> Option<usize> {
        self.stack.iter().position(|l| l.id == id)
    }

    /// Every stack layer between the backend and `base`, inclusive,
    /// oldest first. Returns empty if `base` already flattened into
    /// the backend (its content is then already reflected there).
    fn chain_upto(&self, base: StateId) -> Vec<&StackLayer> {
        match base {
            StateId::Backend => vec![],
            StateId::Stack(id) => match self.layer_pos(id) {
                Some(pos) => self.stack[..=pos].iter().collect(),
                None => vec![],
            },
        }
    }

    pub(crate) fn read_through(&self, base: StateId, key: &Key) -> Result<Option<Value>> {
        for layer in self.chain_upto(base).into_iter().rev() {
            if let Some((_, v)) = layer.batch.modified.iter().rev().find(|(k, _)| k == key) {
                return Ok(Some(v.clone()));
            }
            if layer.batch.removed.contains(key) {
                return Ok(None);
            }
            if layer.batch.truncated {
                return Ok(None);
            }
        }
        self.backend.lock().unwrap().get(&self.table, key)
    }

    pub(crate) fn read_through_keys(&self, base: StateId, range: &KeyRange) -> Result<Vec<Key>> {
        let chain = self.chain_upto(base);
        let start_from_backend = !chain.iter().any(|l| l.batch.truncated);
        let mut acc: std::collections::BTreeSet<Key> = if start_from_backend {
            self.backend.lock().unwrap().keys(&self.table, range)?.into_iter().collect()
        } else {
            std::collections::BTreeSet::new()
        };
        // Only the layers after the last truncate matter.
        let last_truncate = chain.iter().rposition(|l| l.batch.truncated);
        let relevant = match last_truncate {
            Some(pos) => &chain[pos..],
            None => &chain[..],
        };
        for layer in relevant {
            if layer.batch.truncated {
                acc.clear();
            }
            for k in &layer.batch.removed {
                acc.remove(k);
            }
            for (k, _) in &layer.batch.modified {
                if range.contains(k) {
                    acc.insert(k.clone());
                } else {
                    acc.remove(k);
                }
            }
        }
        Ok(acc.into_iter().collect())
    }

    /// §4.6 `commit(tx)`.
    pub(crate) fn commit(&mut self, tx: &mut Transaction) -> Result<bool> {
        let b = match self.base_of.remove(&tx.id) {
            Some(b) => b,
            None => return err_at!(InvalidState, msg: "tx {} unknown to table {}", tx.id, self.table),
        };
        if self.closed_bases.contains(&b) {
            warn!("tx {} conflicted: base {:?} already closed", tx.id, b);
            self.dec_open(b);
            if self.open_of(b) == 0 {
                self.collapse()?;
            }
            return Ok(false);
        }
        self.dec_open(b);
        let will_flatten = self.open_of(b) == 0;

        if !will_flatten && self.stack.len() >= self.max_stack_size {
            self.inc_open(b);
            self.base_of.insert(tx.id, b);
            return err_at!(
                StackOverflow,
                msg: "table {} stack depth {} at limit",
                self.table,
                self.stack.len()
            );
        }

        let batch = tx.to_batch();
        self.stack.push(StackLayer { id: tx.id, base: b, batch });
        self.open_count.insert(StateId::Stack(tx.id), 0);

        if will_flatten {
            self.collapse()?;
        } else {
            self.closed_bases.insert(b);
        }
        Ok(true)
    }

    /// §4.6 `abort(tx)`: releases the base the transaction was
    /// reading from and retries flattening, without applying the
    /// aborted transaction's own (discarded) batch.
    pub(crate) fn abort(&mut self, tx: &mut Transaction) -> Result<()> {
        if let Some(b) = self.base_of.remove(&tx.id) {
            self.dec_open(b);
            if self.open_of(b) == 0 {
                self.collapse()?;
            }
        }
        Ok(())
    }

    /// Folds every stack layer whose id nobody reads from anymore
    /// (from the top down) into its own base, finally applying to the
    /// backend once the chain reaches it.
    fn collapse(&mut self) -> Result<()> {
        loop {
            let top_id = match self.stack.last() {
                Some(l) => l.id,
                None => break,
            };
            if self.open_of(StateId::Stack(top_id)) != 0 {
                break;
            }
            let base = self.stack.last().unwrap().base;
            if self.open_of(base) != 0 {
                break;
            }
            let top = self.stack.pop().unwrap();
            self.open_count.remove(&StateId::Stack(top.id));
            match base {
                StateId::Backend => {
                    debug!("flattening tx {} onto backend table {}", top.id, self.table);
                    self.backend.lock().unwrap().apply(top.batch)?;
                }
                StateId::Stack(base_id) => match self.layer_pos(base_id) {
                    Some(pos) => flatten_onto(&mut self.stack[pos].batch, top.batch),
                    None => {
                        // base already flattened into the backend by
                        // an earlier iteration of this same loop.
                        self.backend.lock().unwrap().apply(top.batch)?;
                    }
                },
            }
        }
        Ok(())
    }

    pub fn truncate(&mut self) -> Result<()> {
        self.backend.lock().unwrap().truncate(&self.table)
    }
}

fn clone_def(def: &IndexDef) -> IndexDef {
    IndexDef {
        name: def.name.clone(),
        key_path: def.key_path.clone(),
        multi_entry: def.multi_entry,
        unique: def.unique,
    }
}

#[cfg(test)]
#[path = "object_store_test.rs"]
mod object_store_test;
