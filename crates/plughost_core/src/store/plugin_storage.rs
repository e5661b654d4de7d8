//! Private per-plugin storage namespaces.
//!
//! # Responsibility
//! - Hand every plugin its own durable key-value store.
//! - Erase a plugin's namespace on request.
//!
//! # Invariants
//! - One store file per canonical plugin id under the provisioner root.
//! - Namespaces are disjoint from each other and from lifecycle records.

use crate::extension::plugin_id::PluginId;
use crate::store::kv_store::SqliteKeyValueStore;
use crate::store::{KeyValueStore, StoreResult};
use log::debug;
use std::path::{Path, PathBuf};

const NAMESPACE_FILE_EXTENSION: &str = "sqlite3";

/// Allocates and clears plugin storage namespaces below one root directory.
#[derive(Debug, Clone)]
pub struct PluginStorageProvisioner {
    root: PathBuf,
}

impl PluginStorageProvisioner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store file backing the namespace of `plugin`.
    pub fn namespace_path(&self, plugin: &PluginId) -> PathBuf {
        self.root
            .join(format!("{}.{NAMESPACE_FILE_EXTENSION}", plugin.as_str()))
    }

    /// Opens (creating on first use) the namespace of `plugin`.
    pub fn open(&self, plugin: &PluginId) -> StoreResult<PluginStorage> {
        let store = SqliteKeyValueStore::open(self.namespace_path(plugin))?;
        Ok(PluginStorage {
            plugin: plugin.clone(),
            store,
        })
    }

    /// Erases every entry of the namespace of `plugin`.
    pub fn clear(&self, plugin: &PluginId) -> StoreResult<usize> {
        let path = self.namespace_path(plugin);
        if !path.exists() {
            return Ok(0);
        }
        let removed = SqliteKeyValueStore::open(&path)?.clear()?;
        debug!(
            "event=plugin_storage_clear module=store status=ok plugin={} removed={}",
            plugin, removed
        );
        Ok(removed)
    }
}

/// Handle to one plugin's private namespace.
pub struct PluginStorage {
    plugin: PluginId,
    store: SqliteKeyValueStore,
}

impl PluginStorage {
    /// Owner of this namespace.
    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin
    }
}

impl KeyValueStore for PluginStorage {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.store.get(key)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.store.set(key, value)
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        self.store.remove(key)
    }

    fn clear(&self) -> StoreResult<usize> {
        self.store.clear()
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        self.store.keys()
    }
}
