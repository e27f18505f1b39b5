//! §4.7 `CombinedTransaction`: commits two or more top-level
//! transactions spanning distinct object stores as a single atomic
//! unit. Batches that target the same backend instance are merged
//! and applied together through `Backend::apply_combined`; if any
//! backend group fails, no participant's store bookkeeping is
//! touched.
//!
//! Persistent backend groups apply first, each snapshotted
//! immediately beforehand so a later group's failure can restore
//! every persistent group already applied; non-persistent (in-memory)
//! groups apply only once every persistent group has landed, since
//! they have no durability to race against and nothing worth
//! snapshotting.
//!
//! Simplification (recorded in `DESIGN.md`): a combined commit always
//! writes straight to its participants' backends instead of pushing a
//! deferred stack layer the way a lone `ObjectStore::commit` may —
//! atomicity across backends already requires applying together, so
//! there is nothing left to defer.

use std::sync::{Arc, Mutex};

use log::{debug, error};

use crate::backend::{Backend, BackendBatch, TableSnapshot};
use crate::error::err_at;
use crate::object_store::ObjectStore;
use crate::transaction::Transaction;
use crate::Result;

/// Commits `txs` atomically. Returns `Ok(true)` if every participant
/// committed, `Ok(false)` if any participant's precondition failed
/// (a sibling committed first on its base) — in which case every
/// input transaction is left untouched and may be retried.
pub fn commit_combined(txs: &mut [Transaction]) -> Result<bool> {
    if txs.len() < 2 {
        return err_at!(InvalidArguments, msg: "combined commit needs at least two transactions, got {}", txs.len());
    }

    let mut seen_tables = std::collections::HashSet::new();
    for tx in txs.iter() {
        if tx.is_nested() {
            return err_at!(InvalidArguments, msg: "tx {} is nested, not eligible for a combined commit", tx.id());
        }
        if !seen_tables.insert(tx.table().to_string()) {
            return err_at!(InvalidArguments, msg: "duplicate store {} in combined commit", tx.table());
        }
    }

    let stores: Vec<Arc<Mutex<ObjectStore>>> = txs.iter().map(|tx| tx.store_arc()).collect();

    for (tx, store) in txs.iter().zip(&stores) {
        if !store.lock().unwrap().can_commit(tx.id())? {
            debug!("combined commit aborted: tx {} on {} already conflicted", tx.id(), tx.table());
            return Ok(false);
        }
    }

    // Group batches by the backend instance they target, per §4.7.
    let mut groups: Vec<(Arc<Mutex<dyn Backend + Send>>, Vec<BackendBatch>)> = vec![];
    for (tx, store) in txs.iter().zip(&stores) {
        let backend = store.lock().unwrap().backend_handle();
        let batch = tx.to_batch();
        match groups.iter_mut().find(|(b, _)| Arc::ptr_eq(b, &backend)) {
            Some((_, batches)) => batches.push(batch),
            None => groups.push((backend, vec![batch])),
        }
    }

    let (persistent, in_memory): (Vec<_>, Vec<_>) =
        groups.into_iter().partition(|(b, _)| b.lock().unwrap().is_persistent());

    // Snapshot every table a persistent group is about to touch, so a
    // later group's failure can restore everything already applied.
    let mut applied: Vec<(Arc<Mutex<dyn Backend + Send>>, Vec<(String, TableSnapshot)>)> = vec![];
    for (backend, batches) in persistent {
        let snapshots: Result<Vec<(String, TableSnapshot)>> = {
            let mut guard = backend.lock().unwrap();
            batches
                .iter()
                .map(|b| Ok((b.table.clone(), guard.snapshot_table(&b.table)?)))
                .collect()
        };
        let snapshots = match snapshots {
            Ok(s) => s,
            Err(e) => {
                rollback(&applied);
                return Err(e);
            }
        };
        match backend.lock().unwrap().apply_combined(batches) {
            Ok(()) => applied.push((backend, snapshots)),
            Err(e) => {
                rollback(&applied);
                return Err(e);
            }
        }
    }

    for (backend, batches) in in_memory {
        backend.lock().unwrap().apply_combined(batches)?;
    }

    for (tx, store) in txs.iter().zip(&stores) {
        store.lock().unwrap().finalize_direct(tx.id());
    }
    for tx in txs.iter_mut() {
        tx.mark_committed();
    }

    Ok(true)
}

/// Restores every already-applied persistent group, most-recent
/// first, undoing this combined commit's own writes to them. Best
/// effort: a restore failure is logged rather than propagated, since
/// the original error is what the caller needs to see.
fn rollback(applied: &[(Arc<Mutex<dyn Backend + Send>>, Vec<(String, TableSnapshot)>)]) {
    for (backend, snapshots) in applied.iter().rev() {
        let mut guard = backend.lock().unwrap();
        for (table, snapshot) in snapshots.iter().rev() {
            if let Err(e) = guard.restore_table(table, snapshot.clone()) {
                error!("combined commit rollback failed restoring table {}: {:?}", table, e);
            }
        }
    }
}

#[cfg(test)]
#[path = "combined_test.rs"]
mod combined_test;
