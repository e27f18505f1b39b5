//! §6 `Database`: the top-level facade. Owns the named object stores,
//! the shared backend handle behind them, and the connected/
//! disconnected lifecycle that gates structural changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::backend::Backend;
use crate::error::err_at;
use crate::memindex::IndexDef;
use crate::object_store::ObjectStore;
use crate::transaction::Transaction;
use crate::Result;

/// Options governing one object store, per §6. `enable_lru_cache`/
/// `lru_cache_size`/`raw_lru_cache_size` describe the store's desired
/// caching behavior; this crate's [`crate::backend::CachedBackend`]
/// decorates an entire backend rather than a single table, so the
/// actual cache wrapping happens once at [`Database::connect`] — these
/// fields are recorded on the store for introspection and are honored
/// by callers that build their own backend stack.
#[derive(Clone, Debug)]
pub struct StoreOptions {
    pub codec: Option<String>,
    pub persistent: bool,
    pub enable_lru_cache: bool,
    pub lru_cache_size: usize,
    pub raw_lru_cache_size: usize,
}

impl Default for StoreOptions {
    fn default() -> StoreOptions {
        StoreOptions {
            codec: None,
            persistent: true,
            enable_lru_cache: true,
            lru_cache_size: 5000,
            raw_lru_cache_size: 0,
        }
    }
}

/// Options governing one secondary index, per §6.
#[derive(Clone, Debug, Default)]
pub struct IndexOptions {
    pub multi_entry: bool,
    pub unique: bool,
    pub key_encoding: Option<String>,
}

struct StoreEntry {
    store: Arc<Mutex<ObjectStore>>,
    options: StoreOptions,
}

/// A named, versioned database: a directory of [`ObjectStore`]s
/// sharing one backend, with structural changes (creating or deleting
/// a store or index) gated to the disconnected state.
pub struct Database {
    name: String,
    version: u32,
    backend: Arc<Mutex<dyn Backend + Send>>,
    stores: HashMap<String, StoreEntry>,
    connected: bool,
}

impl Database {
    /// Opens `name` at `version` against `backend`, running
    /// `upgrade_hook(db, old_version, version)` first if `version` is
    /// newer than the database has seen before — the hook is the only
    /// place `createObjectStore`/`deleteObjectStore` may be called
    /// once `connect` returns, matching §6 ("structural operations
    /// allowed only while disconnected").
    pub fn connect(
        name: impl Into<String>,
        version: u32,
        backend: Arc<Mutex<dyn Backend + Send>>,
        old_version: u32,
        upgrade_hook: Option<&mut dyn FnMut(&mut Database, u32, u32) -> Result<()>>,
    ) -> Result<Database> {
        if version < 1 {
            return err_at!(InvalidArguments, msg: "database version must be >= 1, got {}", version);
        }
        let mut db = Database {
            name: name.into(),
            version,
            backend,
            stores: HashMap::new(),
            connected: false,
        };
        if let Some(hook) = upgrade_hook {
            if version > old_version {
                debug!("upgrading database {} from {} to {}", db.name, old_version, version);
                hook(&mut db, old_version, version)?;
            }
        }
        db.connected = true;
        info!("database {} connected at version {}", db.name, db.version);
        Ok(db)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    fn ensure_disconnected(&self, what: &str) -> Result<()> {
        if self.connected {
            return err_at!(InvalidState, msg: "cannot {} while database {} is connected", what, self.name);
        }
        Ok(())
    }

    /// Creates a table on the backend and its in-process [`ObjectStore`]
    /// bookkeeping. Only valid before `connect` returns, i.e. from
    /// inside the upgrade hook or before the database is first opened.
    pub fn create_object_store(&mut self, name: impl Into<String>, options: StoreOptions) -> Result<()> {
        self.ensure_disconnected("create object store")?;
        let name = name.into();
        if self.stores.contains_key(&name) {
            return err_at!(InvalidArguments, msg: "object store {} already exists", name);
        }
        self.backend.lock().unwrap().create_table(&name)?;
        let store = ObjectStore::new(name.clone(), self.backend.clone());
        self.stores.insert(
            name,
            StoreEntry {
                store: Arc::new(Mutex::new(store)),
                options,
            },
        );
        Ok(())
    }

    pub fn delete_object_store(&mut self, name: &str) -> Result<()> {
        self.ensure_disconnected("delete object store")?;
        match self.stores.remove(name) {
            Some(_) => self.backend.lock().unwrap().delete_table(name),
            None => err_at!(NotConnected, msg: "no such object store {}", name),
        }
    }

    pub fn get_object_store(&self, name: &str) -> Result<Arc<Mutex<ObjectStore>>> {
        match self.stores.get(name) {
            Some(entry) => Ok(entry.store.clone()),
            None => err_at!(NotConnected, msg: "no such object store {}", name),
        }
    }

    pub fn store_options(&self, name: &str) -> Result<StoreOptions> {
        match self.stores.get(name) {
            Some(entry) => Ok(entry.options.clone()),
            None => err_at!(NotConnected, msg: "no such object store {}", name),
        }
    }

    /// Registers a secondary index on `store`. Only valid while
    /// disconnected, same as the stores themselves.
    pub fn create_index(
        &mut self,
        store: &str,
        index_name: impl Into<String>,
        key_path: crate::key::KeyPath,
        options: IndexOptions,
    ) -> Result<()> {
        self.ensure_disconnected("create index")?;
        let entry = match self.stores.get(store) {
            Some(e) => e,
            None => return err_at!(NotConnected, msg: "no such object store {}", store),
        };
        let def = IndexDef {
            name: index_name.into(),
            key_path,
            multi_entry: options.multi_entry,
            unique: options.unique,
        };
        entry.store.lock().unwrap().register_index(def)
    }

    pub fn delete_index(&mut self, store: &str, index_name: &str) -> Result<()> {
        self.ensure_disconnected("delete index")?;
        let entry = match self.stores.get(store) {
            Some(e) => e,
            None => return err_at!(NotConnected, msg: "no such object store {}", store),
        };
        entry.store.lock().unwrap().drop_index(index_name)
    }

    /// Opens a top-level transaction over `store`.
    pub fn transaction(&self, store: &str) -> Result<Transaction> {
        if !self.connected {
            return err_at!(NotConnected, msg: "database {} is not connected", self.name);
        }
        let entry = match self.stores.get(store) {
            Some(e) => e,
            None => return err_at!(NotConnected, msg: "no such object store {}", store),
        };
        ObjectStore::begin(&entry.store)
    }

    fn any_open_transactions(&self) -> bool {
        self.stores.values().any(|e| e.store.lock().unwrap().has_open_transactions())
    }

    /// Disconnects, refusing if any store still has an open
    /// transaction (§7 `CloseWhileActive`).
    pub fn close(&mut self) -> Result<()> {
        if self.any_open_transactions() {
            return err_at!(CloseWhileActive, msg: "database {} has open transactions", self.name);
        }
        self.connected = false;
        info!("database {} closed", self.name);
        Ok(())
    }

    /// Closes, then truncates and drops every object store and the
    /// backend itself.
    pub fn destroy(mut self) -> Result<()> {
        self.close()?;
        for (_, entry) in self.stores.drain() {
            entry.store.lock().unwrap().truncate()?;
        }
        self.backend.lock().unwrap().destroy()
    }
}

#[cfg(test)]
#[path = "database_test.rs"]
mod database_test;
