//! Durable last-known lifecycle state per plugin.
//!
//! # Responsibility
//! - Remember the lifecycle state of every plugin across restarts.
//!
//! # Invariants
//! - Records are advisory: the registry writes them after each transition
//!   and never reads them to drive a transition.
//! - Keys are `state_<canonical plugin id>`.

use crate::extension::plugin_id::PluginId;
use crate::store::kv_store::SqliteKeyValueStore;
use crate::store::{KeyValueStore, StoreError, StoreResult};
use std::fmt::{Display, Formatter};
use std::path::Path;

const STATE_KEY_PREFIX: &str = "state_";

/// Lifecycle state of one plugin as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Loaded,
    Running,
}

impl LifecycleState {
    /// Stable string stored in the lifecycle record.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Running => "running",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unloaded" => Some(Self::Unloaded),
            "loaded" => Some(Self::Loaded),
            "running" => Some(Self::Running),
            _ => None,
        }
    }
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle record store over any `KeyValueStore`.
pub struct LifecycleStateStore {
    store: Box<dyn KeyValueStore>,
}

impl LifecycleStateStore {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Opens the SQLite-backed record file at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self::new(Box::new(SqliteKeyValueStore::open(path)?)))
    }

    pub fn record(&self, plugin: &PluginId, state: LifecycleState) -> StoreResult<()> {
        self.store.set(&state_key(plugin), state.as_str())
    }

    /// Returns the last recorded state, `None` when nothing was recorded.
    pub fn get(&self, plugin: &PluginId) -> StoreResult<Option<LifecycleState>> {
        let Some(raw) = self.store.get(&state_key(plugin))? else {
            return Ok(None);
        };
        LifecycleState::parse(&raw).map(Some).ok_or_else(|| {
            StoreError::InvalidData(format!("unknown lifecycle state `{raw}` for {plugin}"))
        })
    }

    /// State a bootstrapper should restore. Plugins never seen before default
    /// to `Running`.
    pub fn initial_state(&self, plugin: &PluginId) -> StoreResult<LifecycleState> {
        Ok(self.get(plugin)?.unwrap_or(LifecycleState::Running))
    }
}

fn state_key(plugin: &PluginId) -> String {
    format!("{STATE_KEY_PREFIX}{plugin}")
}
