//! §6: the backend contract. Concrete persistence drivers are out of
//! scope for this crate (§1) — this module specifies only the trait
//! every adapter implements, the [`BackendBatch`] wire shape that is
//! the sole write interface into one, and (per §6's expansion) one
//! reference implementation so the core is usable and testable without
//! an external engine.

mod cache;
mod memory;

pub use cache::CachedBackend;
pub use memory::MemoryBackend;

use crate::key::{Key, Value};
use crate::key_range::KeyRange;
use crate::memindex::IndexDef;
use crate::Result;

/// One index's worth of changes inside a [`BackendBatch`], expressed
/// as secondary-key/primary-key pairs rather than in terms of
/// [`crate::memindex::Record`] so any backend representation (LSM,
/// B-tree, browser object store) can apply them without depending on
/// this crate's in-memory record shape.
#[derive(Clone, Debug, Default)]
pub struct IndexDelta {
    pub index_name: String,
    pub truncated: bool,
    pub removed: Vec<(Key, Key)>,
    pub inserted: Vec<(Key, Key)>,
}

/// The atomic unit of writes submitted to a backend for one table,
/// produced by `ObjectStore`/`CombinedTransaction` flattening a
/// transaction's overlay down onto its base state (§3, §4.6, §4.7).
#[derive(Clone, Debug, Default)]
pub struct BackendBatch {
    pub table: String,
    pub truncated: bool,
    pub removed: Vec<Key>,
    pub modified: Vec<(Key, Value)>,
    pub index_deltas: Vec<IndexDelta>,
}

/// A full, backend-defined dump of one table's primary rows and every
/// secondary index, opaque to callers. `commit_combined` (§4.7) uses
/// this to snapshot a table immediately before applying a batch to it
/// and restore it if a later participant's backend fails, without
/// needing to know anything about the backend's internal
/// representation.
#[derive(Clone, Debug, Default)]
pub struct TableSnapshot {
    pub rows: Vec<(Key, Value)>,
    pub indices: Vec<(String, Vec<(Key, Key)>)>,
}

/// An ordered key-value store exposing get/keys/values/min/max/count/
/// stream plus the `applyCombined` hook for atomic batch application
/// (§6). Implemented by each concrete persistence driver; this crate
/// ships [`MemoryBackend`] as the reference implementation and
/// [`CachedBackend`] as a read-through decorator over any of them.
pub trait Backend {
    fn create_table(&mut self, table: &str) -> Result<()>;
    fn delete_table(&mut self, table: &str) -> Result<()>;
    fn create_index(&mut self, table: &str, def: IndexDef) -> Result<()>;
    fn delete_index(&mut self, table: &str, index_name: &str) -> Result<()>;

    fn get(&mut self, table: &str, key: &Key) -> Result<Option<Value>>;
    fn put(&mut self, table: &str, key: Key, value: Value) -> Result<()>;
    fn remove(&mut self, table: &str, key: &Key) -> Result<()>;

    fn keys(&mut self, table: &str, range: &KeyRange) -> Result<Vec<Key>>;
    fn values(&mut self, table: &str, range: &KeyRange) -> Result<Vec<Value>>;
    fn min_key(&mut self, table: &str, range: &KeyRange) -> Result<Option<Key>>;
    fn max_key(&mut self, table: &str, range: &KeyRange) -> Result<Option<Key>>;
    fn min_value(&mut self, table: &str, range: &KeyRange) -> Result<Option<Value>>;
    fn max_value(&mut self, table: &str, range: &KeyRange) -> Result<Option<Value>>;
    fn count(&mut self, table: &str, range: &KeyRange) -> Result<usize>;

    fn index_keys(
        &mut self,
        table: &str,
        index_name: &str,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> Result<Vec<Key>>;
    fn index_min_keys(&mut self, table: &str, index_name: &str, range: &KeyRange) -> Result<Vec<Key>>;
    fn index_max_keys(&mut self, table: &str, index_name: &str, range: &KeyRange) -> Result<Vec<Key>>;

    /// The smallest/largest secondary key itself inside `range` —
    /// distinct from `index_min_keys`/`index_max_keys`, which resolve
    /// straight to the primary keys tied to it. Callers that need to
    /// compare an index's extreme against another candidate (e.g. an
    /// uncommitted overlay's own extreme) need the secondary key, not
    /// just what it currently maps to.
    fn index_min_key(&mut self, table: &str, index_name: &str, range: &KeyRange) -> Result<Option<Key>>;
    fn index_max_key(&mut self, table: &str, index_name: &str, range: &KeyRange) -> Result<Option<Key>>;

    /// Ascending or descending walk over `table`, invoking `visit` for
    /// each key until it returns `false` or the range is exhausted —
    /// the synchronous equivalent of §6's callback-driven stream.
    fn key_stream(
        &mut self,
        table: &str,
        range: &KeyRange,
        ascending: bool,
        visit: &mut dyn FnMut(&Key) -> bool,
    ) -> Result<()>;

    fn value_stream(
        &mut self,
        table: &str,
        range: &KeyRange,
        ascending: bool,
        visit: &mut dyn FnMut(&Key, &Value) -> bool,
    ) -> Result<()>;

    /// Apply one table's flattened changes atomically.
    fn apply(&mut self, batch: BackendBatch) -> Result<()>;

    /// Apply several tables' batches as a single atomic unit — the
    /// backend-level transaction a [`crate::combined::CombinedTransaction`]
    /// commits through (§4.7).
    fn apply_combined(&mut self, batches: Vec<BackendBatch>) -> Result<()>;

    fn truncate(&mut self, table: &str) -> Result<()>;

    fn close(&mut self) -> Result<()>;
    fn destroy(&mut self) -> Result<()>;

    /// Whether this backend durably persists writes. `commit_combined`
    /// applies persistent backends first (snapshotting each table it
    /// touches so a later participant's failure can be rolled back)
    /// and defers non-persistent ones until every persistent write has
    /// landed, since they have no durability to race against.
    fn is_persistent(&self) -> bool {
        true
    }

    fn snapshot_table(&mut self, table: &str) -> Result<TableSnapshot>;
    fn restore_table(&mut self, table: &str, snapshot: TableSnapshot) -> Result<()>;
}
