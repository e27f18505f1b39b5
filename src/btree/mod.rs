//! §4.1: an in-memory ordered map from key to record, with a stateful
//! cursor for range navigation. The underlying tree is a left-leaning
//! red-black tree (see [`node`]); "B+ tree" in the component's name is
//! the distilled spec's term for "ordered, cursor-navigable map" and
//! is preserved here as the public type's documented contract rather
//! than its literal data structure.

mod node;

use node::Link;

use crate::key::Key;
use crate::key_range::KeyRange;

/// How [`OrderedIndex::seek`] should interpret the target key when it
/// is not present exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekMode {
    Exact,
    Ge,
    Le,
}

/// An explicit, owned cursor position, kept separate from the tree
/// itself per §9's design note — it is just the last key the cursor
/// was placed on (or `None` when cleared), so holding one never
/// borrows from, or blocks mutation of, the tree it was produced from.
/// Re-deriving a position after a concurrent mutation is a plain
/// `seek` call away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cursor {
    current: Option<Key>,
}

impl Cursor {
    fn cleared() -> Cursor {
        Cursor { current: None }
    }

    fn at(key: Key) -> Cursor {
        Cursor { current: Some(key) }
    }

    pub fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn key(&self) -> Option<&Key> {
        self.current.as_ref()
    }
}

/// In-memory ordered map from [`Key`] to a record of type `V`.
pub struct OrderedIndex<V> {
    root: Link<V>,
    len: usize,
}

impl<V> Default for OrderedIndex<V> {
    fn default() -> Self {
        OrderedIndex::new()
    }
}

impl<V> OrderedIndex<V> {
    pub fn new() -> OrderedIndex<V> {
        OrderedIndex { root: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, key: &Key) -> Option<&V> {
        node::get(&self.root, key)
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    /// Insert if absent, else overwrite. Returns whether a fresh key
    /// was inserted, and a cursor positioned at the affected entry.
    pub fn insert(&mut self, key: Key, value: V) -> (bool, Cursor) {
        let (root, inserted) = node::insert(self.root.take(), key.clone(), value);
        self.root = Some(root);
        if inserted {
            self.len += 1;
        }
        (inserted, Cursor::at(key))
    }

    /// Remove the entry if present. Returns whether anything was
    /// removed, and a cursor at the successor of the removed key (or
    /// cleared, if none).
    pub fn remove(&mut self, key: &Key) -> (bool, Cursor) {
        let (root, removed) = node::delete(self.root.take(), key);
        self.root = root;
        if removed {
            self.len -= 1;
        }
        let cursor = if removed {
            match self.successor_of(key) {
                Some((k, _)) => Cursor::at(k.clone()),
                None => Cursor::cleared(),
            }
        } else {
            Cursor::cleared()
        };
        (removed, cursor)
    }

    fn inorder(&self) -> Vec<(&Key, &V)> {
        let mut out = Vec::with_capacity(self.len);
        node::collect_inorder(&self.root, &mut out);
        out
    }

    fn successor_of(&self, key: &Key) -> Option<(&Key, &V)> {
        self.inorder().into_iter().find(|(k, _)| *k > key)
    }

    fn predecessor_of(&self, key: &Key) -> Option<(&Key, &V)> {
        self.inorder().into_iter().rfind(|(k, _)| *k < key)
    }

    /// Position a cursor on `key` per `mode`: `Exact` requires the key
    /// present, `Ge`/`Le` fall back to the nearest entry on that side.
    pub fn seek(&self, key: &Key, mode: SeekMode) -> Cursor {
        if self.get(key).is_some() {
            return Cursor::at(key.clone());
        }
        match mode {
            SeekMode::Exact => Cursor::cleared(),
            SeekMode::Ge => match self.successor_of(key) {
                Some((k, _)) => Cursor::at(k.clone()),
                None => Cursor::cleared(),
            },
            SeekMode::Le => match self.predecessor_of(key) {
                Some((k, _)) => Cursor::at(k.clone()),
                None => Cursor::cleared(),
            },
        }
    }

    pub fn go_top(&self) -> Cursor {
        match self.inorder().first() {
            Some((k, _)) => Cursor::at((*k).clone()),
            None => Cursor::cleared(),
        }
    }

    pub fn go_bottom(&self) -> Cursor {
        match self.inorder().last() {
            Some((k, _)) => Cursor::at((*k).clone()),
            None => Cursor::cleared(),
        }
    }

    /// Smallest key `>=`/`>` lower, per `open`.
    pub fn go_to_lower_bound(&self, lower: &Key, open: bool) -> Cursor {
        let entries = self.inorder();
        let found = entries
            .into_iter()
            .find(|(k, _)| if open { **k > *lower } else { **k >= *lower });
        match found {
            Some((k, _)) => Cursor::at(k.clone()),
            None => Cursor::cleared(),
        }
    }

    /// Largest key `<=`/`<` upper, per `open`.
    pub fn go_to_upper_bound(&self, upper: &Key, open: bool) -> Cursor {
        let entries = self.inorder();
        let found = entries
            .into_iter()
            .rfind(|(k, _)| if open { **k < *upper } else { **k <= *upper });
        match found {
            Some((k, _)) => Cursor::at(k.clone()),
            None => Cursor::cleared(),
        }
    }

    /// 1-based rank of the cursor's key, or `None` if the cursor is
    /// cleared or stale (key no longer present).
    pub fn keynum(&self, cursor: &Cursor) -> Option<usize> {
        let key = cursor.key()?;
        self.inorder()
            .iter()
            .position(|(k, _)| *k == key)
            .map(|idx| idx + 1)
    }

    /// Advance the cursor by `n` entries (negative moves backward).
    /// Fails (returns a cleared cursor paired with `false`) if the
    /// move would run past either end.
    pub fn skip(&self, cursor: &Cursor, n: i64) -> (bool, Cursor) {
        let rank = match self.keynum(cursor) {
            Some(r) => r as i64,
            None => return (false, Cursor::cleared()),
        };
        let target = rank + n;
        let entries = self.inorder();
        if target < 1 || target as usize > entries.len() {
            return (false, Cursor::cleared());
        }
        let (k, _) = entries[(target - 1) as usize];
        (true, Cursor::at(k.clone()))
    }

    pub fn cursor_value(&self, cursor: &Cursor) -> Option<(&Key, &V)> {
        let key = cursor.key()?;
        self.get(key).map(|v| (key, v))
    }

    /// Rebalancing is a no-op: the left-leaning red-black invariant is
    /// maintained on every insert/remove, so there is never a
    /// maintenance pass to run. Kept as a named operation for
    /// interface parity with backends whose trees are not always
    /// balanced.
    pub fn pack(&mut self) {}

    /// Every `(key, value)` pair inside `range`, ascending.
    pub fn range(&self, range: &KeyRange) -> Vec<(&Key, &V)> {
        self.inorder()
            .into_iter()
            .filter(|(k, _)| range.contains(k))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &V)> {
        self.inorder().into_iter()
    }

    /// A fresh, empty staging area for batched mutations against this
    /// tree's key space — see [`TreeTransaction`].
    pub fn transaction(&self) -> TreeTransaction<V> {
        TreeTransaction::new()
    }
}

/// A staged insertion/removal list, built up independently of the
/// live tree and later applied (or folded into another transaction)
/// as a single batch. Persistent-index backends use this to produce
/// one flushable batch instead of mutating the tree entry by entry.
pub struct TreeTransaction<V> {
    inserts: Vec<(Key, V)>,
    removes: Vec<Key>,
}

impl<V> Default for TreeTransaction<V> {
    fn default() -> Self {
        TreeTransaction::new()
    }
}

impl<V> TreeTransaction<V> {
    pub fn new() -> TreeTransaction<V> {
        TreeTransaction {
            inserts: Vec::new(),
            removes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.removes.is_empty()
    }

    /// Stage an insert/overwrite, discarding any earlier staged op for
    /// the same key.
    pub fn insert(&mut self, key: Key, value: V) {
        self.removes.retain(|k| k != &key);
        self.inserts.retain(|(k, _)| k != &key);
        self.inserts.push((key, value));
    }

    /// Stage a removal, discarding any earlier staged op for the same
    /// key.
    pub fn remove(&mut self, key: Key) {
        self.inserts.retain(|(k, _)| k != &key);
        self.removes.retain(|k| k != &key);
        self.removes.push(key);
    }

    /// Fold `other`'s staged ops on top of this one's; on a key staged
    /// in both, `other` wins.
    pub fn merge(&mut self, other: TreeTransaction<V>) {
        for key in other.removes {
            self.remove(key);
        }
        for (key, value) in other.inserts {
            self.insert(key, value);
        }
    }

    /// Apply every staged op to `index`.
    pub fn apply(self, index: &mut OrderedIndex<V>) {
        for key in self.removes {
            index.remove(&key);
        }
        for (key, value) in self.inserts {
            index.insert(key, value);
        }
    }
}
