//! Store Handle Registry: one open RocksDB handle per logical database name.
//!
//! Handles are opened lazily on first use, cached for the lifetime of the
//! registry, and evicted on [`StoreRegistry::close`]. The registry is an
//! explicit object the host constructs and injects; there is no ambient
//! global state. During graceful shutdown the host calls
//! [`StoreRegistry::shutdown`] once; re-entrant calls are no-ops.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rocksdb::{Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

// ============================================================================
// StoreOptions
// ============================================================================

/// Default RocksDB options factory for registry-owned stores.
pub struct StoreOptions;

impl StoreOptions {
    /// Default options for a read-write store.
    ///
    /// Settings:
    /// - `create_if_missing`: true (databases appear on first open)
    /// - Parallelism: background jobs scale with available CPUs
    pub fn default_for_store() -> Options {
        let mut options = Options::default();
        options.create_if_missing(true);

        let num_cpus = std::thread::available_parallelism()
            .map(|p| p.get() as i32)
            .unwrap_or(4);
        options.increase_parallelism(num_cpus);

        options
    }
}

// ============================================================================
// Store
// ============================================================================

/// One open handle to a named embedded key-value engine.
///
/// Values are stored with MessagePack structured encoding via
/// [`Store::put_value`] / [`Store::get_value`]; the raw-byte accessors
/// exist for tooling and migration and bypass that encoding.
pub struct Store {
    name: String,
    db: DB,
}

impl Store {
    fn open(name: &str, path: &Path) -> Result<Self> {
        let db = DB::open(&StoreOptions::default_for_store(), path)?;
        Ok(Self {
            name: name.to_string(),
            db,
        })
    }

    /// The logical database name this handle was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read raw bytes. `Ok(None)` means the key does not exist.
    pub fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_bytes())?)
    }

    /// Write raw bytes, bypassing the structured-value encoding.
    pub fn put_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        Ok(self.db.put(key.as_bytes(), value)?)
    }

    /// Delete a key. Deleting an absent key is not an error.
    pub fn delete_raw(&self, key: &str) -> Result<()> {
        Ok(self.db.delete(key.as_bytes())?)
    }

    /// Read a structured value. `Ok(None)` means the key does not exist;
    /// bytes that fail to decode are an error, not absence.
    pub fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write a value with structured (MessagePack, named-field) encoding.
    pub fn put_value<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = rmp_serde::to_vec_named(value)?;
        Ok(self.db.put(key.as_bytes(), bytes)?)
    }
}

// ============================================================================
// StoreRegistry
// ============================================================================

/// Mutex-guarded mapping from database name to its singleton open handle.
///
/// Each logical database lives at `<base_dir>/<name>`. The map is the only
/// shared mutable state in this layer; the mutex covers the whole
/// open/insert/evict sequence so concurrent `open`/`close` calls cannot
/// corrupt it.
pub struct StoreRegistry {
    base_dir: PathBuf,
    stores: Mutex<HashMap<String, Arc<Store>>>,
    shut_down: AtomicBool,
}

impl StoreRegistry {
    /// Create a registry rooted at `base_dir`. No engine is opened until
    /// the first [`StoreRegistry::open`] call.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            stores: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    fn stores(&self) -> MutexGuard<'_, HashMap<String, Arc<Store>>> {
        // A poisoned map is still structurally valid; recover it.
        self.stores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the singleton handle for `name`, opening the engine on first
    /// use. Repeated calls are cache hits with no side effects.
    ///
    /// Engine-open failures propagate to the caller synchronously; nothing
    /// is retried.
    pub fn open(&self, name: &str) -> Result<Arc<Store>> {
        if name.is_empty() {
            return Err(Error::InvalidArgument(
                "database name must not be empty".to_string(),
            ));
        }

        let mut stores = self.stores();
        if let Some(store) = stores.get(name) {
            return Ok(Arc::clone(store));
        }

        let path = self.base_dir.join(name);
        let store = Store::open(name, &path).map_err(|e| {
            tracing::error!(db = %name, path = %path.display(), error = %e, "[store] Failed to open engine");
            e
        })?;
        tracing::info!(db = %name, path = %path.display(), "[store] Opened engine");

        let store = Arc::new(store);
        stores.insert(name.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// Close the handle for `name` and evict it from the registry, so a
    /// later `open` creates a fresh handle. Closing an unopened name is a
    /// no-op, not an error.
    ///
    /// The engine itself shuts down when the last outstanding `Arc<Store>`
    /// drops; the registry only guarantees it no longer hands that handle
    /// out.
    pub fn close(&self, name: &str) {
        match self.stores().remove(name) {
            Some(_) => tracing::info!(db = %name, "[store] Closed engine"),
            None => tracing::debug!(db = %name, "[store] Close requested for unopened database"),
        }
    }

    /// Close every currently-open handle.
    pub fn close_all(&self) {
        let mut stores = self.stores();
        let count = stores.len();
        stores.clear();
        tracing::info!(count, "[store] Closed all engines");
    }

    /// Explicit shutdown entry point for the host's graceful-shutdown
    /// sequence. Closes all handles exactly once; re-entrant calls are
    /// no-ops.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            tracing::debug!("[store] Shutdown already performed");
            return;
        }
        self.close_all();
        tracing::info!("[store] Shutdown complete");
    }

    /// Number of currently-open handles.
    pub fn open_count(&self) -> usize {
        self.stores().len()
    }
}
