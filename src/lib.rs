//! An embeddable transactional key-value store: snapshot-isolated
//! transactions, secondary indices with unique/multi-entry options,
//! nested transactions, and atomic commits spanning multiple object
//! stores, modeled on IndexedDB's semantics.
//!
//! Each object store keeps a small stack of committed-but-unflushed
//! transactions above its backend (§4.6) rather than writing straight
//! through on every commit, so a long-lived reader never blocks a
//! writer — the stack flattens down to the backend once nobody is
//! still reading an intermediate layer.
//!
//! [`MemoryBackend`] is the reference [`Backend`] implementation; real
//! persistence is left to adapters outside this crate.

mod backend;
mod btree;
mod combined;
mod database;
mod error;
mod key;
mod key_range;
mod memindex;
mod object_store;
mod query;
mod transaction;
mod txindex;

pub use crate::backend::{Backend, BackendBatch, CachedBackend, IndexDelta, MemoryBackend, TableSnapshot};
pub use crate::btree::{Cursor, OrderedIndex, SeekMode, TreeTransaction};
pub use crate::combined::commit_combined;
pub use crate::database::{Database, IndexOptions, StoreOptions};
pub use crate::error::{Error, Result};
pub use crate::key::{
    decode_generic_key, decode_generic_value, encode_generic_key, encode_generic_value, Key, KeyPath, Value,
};
pub use crate::key_range::KeyRange;
pub use crate::memindex::{IndexDef, InMemoryIndex, Record};
pub use crate::object_store::{ObjectStore, StateId};
pub use crate::query::Query;
pub use crate::transaction::{Transaction, TxState};
