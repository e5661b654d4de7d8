//! Host-side plugin lifecycle management.
//! Discovers plugin descriptors, gates them on the host API version, merges
//! their dependencies into the host manifest and drives load/start/stop/unload.

pub mod config;
pub mod db;
pub mod extension;
pub mod logging;
pub mod store;

pub use config::{ConfigError, HostConfig};
pub use extension::builtin::{EchoPlugin, ECHO_ENTRY, ECHO_START_COUNT_KEY};
pub use extension::host::{EventBus, HostApi, LogEventBus, RecordingEventBus};
pub use extension::injector::{
    CommandInstaller, DependencyInstaller, InjectError, InstallError, ManifestInjector,
    SkipInstaller,
};
pub use extension::loader::BuiltinModuleLoader;
pub use extension::manifest::PluginManifest;
pub use extension::module::{
    ModuleExports, ModuleLoadError, ModuleLoader, Plugin, PluginLifecycle, PluginResult,
    PluginRuntimeError,
};
pub use extension::plugin_id::{PluginId, PluginIdError, PLUGIN_FILE_SUFFIX};
pub use extension::registry::{
    Incompatibility, InvalidPluginReason, LifecycleOutcome, PluginError, PluginRegistry,
    RegistryParts, ResolvedModule, SkipReason,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use store::lifecycle_store::{LifecycleState, LifecycleStateStore};
pub use store::plugin_storage::{PluginStorage, PluginStorageProvisioner};
pub use store::{KeyValueStore, StoreError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
