//! Plugin registry: discovery, validation and the lifecycle state machine.
//!
//! # Responsibility
//! - Discover plugin files and resolve them into validated modules.
//! - Drive `Unknown → Loaded → Running → Loaded → Unknown` transitions.
//! - Persist the last-known state of every plugin and announce transitions on
//!   the host event bus.
//!
//! # Invariants
//! - An id is marked running only while it is in the loaded set.
//! - Unload is refused while the plugin is running.
//! - Maps and records change only after the plugin's own hook succeeded.
//! - Plugin hook failures (errors and panics) never escape an operation; they
//!   come back as `LifecycleOutcome::Failed`.
//! - Structural problems (unknown file, invalid module, host manifest or
//!   storage failures) travel on the `PluginError` channel; an incompatible
//!   API range is a `LifecycleOutcome::Declined`, not an error.

use crate::config::{ConfigError, HostConfig};
use crate::extension::host::{
    EventBus, HostApi, EVENT_PLUGIN_LOADED, EVENT_PLUGIN_STARTED, EVENT_PLUGIN_STOPPED,
    EVENT_PLUGIN_UNLOADED,
};
use crate::extension::injector::{
    CommandInstaller, DependencyInstaller, InjectError, ManifestInjector, SkipInstaller,
};
use crate::extension::manifest::PluginManifest;
use crate::extension::module::{guard_plugin_call, ModuleLoader, PluginModule, PluginRuntimeError};
use crate::extension::plugin_id::{has_plugin_suffix, PluginId, PluginIdError};
use crate::extension::version_gate;
use crate::store::lifecycle_store::{LifecycleState, LifecycleStateStore};
use crate::store::plugin_storage::{PluginStorage, PluginStorageProvisioner};
use crate::store::StoreError;
use log::{log, Level};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub type PluginRegistryResult<T> = Result<T, PluginError>;

/// Result of one lifecycle operation that did not hit a structural error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The transition happened.
    Applied,
    /// Nothing to do from the current state.
    Skipped(SkipReason),
    /// The host API version is outside the plugin's required range.
    Declined(Incompatibility),
    /// The plugin's own hook failed; state is unchanged.
    Failed(PluginRuntimeError),
}

impl LifecycleOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyLoaded,
    NotLoaded,
    StillRunning,
    AlreadyRunning,
    NotRunning,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyLoaded => "already_loaded",
            Self::NotLoaded => "not_loaded",
            Self::StillRunning => "still_running",
            Self::AlreadyRunning => "already_running",
            Self::NotRunning => "not_running",
        }
    }
}

/// API version policy decline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incompatibility {
    pub required: String,
    pub host: String,
}

impl Display for Incompatibility {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "plugin requires host API version {}, host runs {}; the host may need an update",
            self.required, self.host
        )
    }
}

/// Why a plugin file is not a usable module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidPluginReason {
    SyntaxError(String),
    MissingManifest,
    MissingStart,
}

impl Display for InvalidPluginReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SyntaxError(detail) => write!(f, "plugin failed to load: {detail}"),
            Self::MissingManifest => write!(f, "plugin is missing its meta_inf block"),
            Self::MissingStart => write!(f, "plugin is missing a start entry"),
        }
    }
}

/// Structural registry errors.
#[derive(Debug)]
pub enum PluginError {
    InvalidPluginId(PluginIdError),
    PluginNotFound(PluginId),
    InvalidPlugin {
        plugin: PluginId,
        reason: InvalidPluginReason,
    },
    DependencyInjection {
        plugin: PluginId,
        source: InjectError,
    },
    Storage(StoreError),
    Config(ConfigError),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Display for PluginError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPluginId(err) => write!(f, "{err}"),
            Self::PluginNotFound(plugin) => write!(f, "plugin file `{plugin}` not found"),
            Self::InvalidPlugin { plugin, reason } => {
                write!(f, "plugin `{plugin}` is invalid: {reason}")
            }
            Self::DependencyInjection { plugin, source } => {
                write!(f, "dependency injection for `{plugin}` failed: {source}")
            }
            Self::Storage(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Io { path, source } => {
                write!(f, "plugin directory i/o failed at `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for PluginError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidPluginId(err) => Some(err),
            Self::DependencyInjection { source, .. } => Some(source),
            Self::Storage(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::PluginNotFound(_) | Self::InvalidPlugin { .. } => None,
        }
    }
}

impl From<PluginIdError> for PluginError {
    fn from(value: PluginIdError) -> Self {
        Self::InvalidPluginId(value)
    }
}

impl From<StoreError> for PluginError {
    fn from(value: StoreError) -> Self {
        Self::Storage(value)
    }
}

impl From<ConfigError> for PluginError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// A module returned by [`PluginRegistry::resolve_module`].
#[derive(Debug)]
pub enum ResolvedModule<'a> {
    /// Served from the loaded set.
    Cached(&'a PluginModule),
    /// Freshly read from disk; not part of the registry.
    Fresh(PluginModule),
}

impl ResolvedModule<'_> {
    pub fn module(&self) -> &PluginModule {
        match self {
            Self::Cached(module) => module,
            Self::Fresh(module) => module,
        }
    }

    pub fn manifest(&self) -> &PluginManifest {
        self.module().manifest()
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

/// Collaborators a registry is assembled from.
pub struct RegistryParts {
    pub plugins_dir: PathBuf,
    pub host: HostApi,
    pub loader: Box<dyn ModuleLoader>,
    pub injector: ManifestInjector,
    pub storage: PluginStorageProvisioner,
    pub states: LifecycleStateStore,
}

/// Owns the loaded/started plugin sets for one host process.
///
/// All mutating operations take `&mut self`; lifecycle operations can never
/// interleave.
pub struct PluginRegistry {
    plugins_dir: PathBuf,
    host: HostApi,
    loader: Box<dyn ModuleLoader>,
    injector: ManifestInjector,
    storage: PluginStorageProvisioner,
    states: LifecycleStateStore,
    loaded: BTreeMap<PluginId, PluginModule>,
    started: BTreeMap<PluginId, bool>,
}

impl PluginRegistry {
    /// Assembles a registry, creating the plugins directory when missing.
    pub fn new(parts: RegistryParts) -> PluginRegistryResult<Self> {
        if !parts.plugins_dir.exists() {
            std::fs::create_dir_all(&parts.plugins_dir).map_err(|source| PluginError::Io {
                path: parts.plugins_dir.clone(),
                source,
            })?;
        }
        Ok(Self {
            plugins_dir: parts.plugins_dir,
            host: parts.host,
            loader: parts.loader,
            injector: parts.injector,
            storage: parts.storage,
            states: parts.states,
            loaded: BTreeMap::new(),
            started: BTreeMap::new(),
        })
    }

    /// Assembles a registry using the directory layout of `config`.
    pub fn from_config(
        config: &HostConfig,
        events: Rc<dyn EventBus>,
        loader: Box<dyn ModuleLoader>,
    ) -> PluginRegistryResult<Self> {
        config.validate()?;
        let installer: Box<dyn DependencyInstaller> =
            match CommandInstaller::from_command_line(&config.install_command, &config.base_dir) {
                Some(installer) => Box::new(installer),
                None => Box::new(SkipInstaller),
            };
        Self::new(RegistryParts {
            plugins_dir: config.plugins_dir(),
            host: HostApi::new(events, config.api_version()?),
            loader,
            injector: ManifestInjector::new(config.host_manifest_path(), installer),
            storage: PluginStorageProvisioner::new(config.plugin_storage_dir()),
            states: LifecycleStateStore::open(config.lifecycle_store_path())?,
        })
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub fn host_api(&self) -> &HostApi {
        &self.host
    }

    pub fn host_api_version(&self) -> &semver::Version {
        self.host.api_version()
    }

    /// Plugin descriptor files in the plugins directory, sorted by name.
    pub fn discover_plugins(&self) -> PluginRegistryResult<Vec<PluginId>> {
        let entries = std::fs::read_dir(&self.plugins_dir).map_err(|source| PluginError::Io {
            path: self.plugins_dir.clone(),
            source,
        })?;

        let mut plugins: Vec<PluginId> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|kind| !kind.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| has_plugin_suffix(name))
            .filter_map(|name| PluginId::parse(&name).ok())
            .collect();
        plugins.sort();
        Ok(plugins)
    }

    /// Returns the loaded module for `plugin`, or reads it from disk without
    /// touching registry state.
    pub fn resolve_module(&mut self, plugin: &str) -> PluginRegistryResult<ResolvedModule<'_>> {
        let id = PluginId::parse(plugin)?;
        if self.loaded.contains_key(&id) {
            return Ok(ResolvedModule::Cached(&self.loaded[&id]));
        }
        Ok(ResolvedModule::Fresh(self.read_module(&id, false)?))
    }

    /// Normalized manifest of `plugin`.
    pub fn manifest_info(&mut self, plugin: &str) -> PluginRegistryResult<PluginManifest> {
        Ok(self.resolve_module(plugin)?.manifest().clone())
    }

    pub fn is_loaded(&self, plugin: &str) -> bool {
        PluginId::parse(plugin)
            .map(|id| self.loaded.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn is_running(&self, plugin: &str) -> bool {
        PluginId::parse(plugin)
            .map(|id| self.is_running_id(&id))
            .unwrap_or(false)
    }

    pub fn loaded_plugins(&self) -> Vec<PluginId> {
        self.loaded.keys().cloned().collect()
    }

    /// Plugins currently running.
    pub fn started_plugins(&self) -> Vec<PluginId> {
        self.started
            .iter()
            .filter(|(_, running)| **running)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Last recorded lifecycle state, `None` when never recorded.
    pub fn persisted_state(&self, plugin: &str) -> PluginRegistryResult<Option<LifecycleState>> {
        let id = PluginId::parse(plugin)?;
        Ok(self.states.get(&id)?)
    }

    /// State an external bootstrapper should restore for `plugin`.
    pub fn initial_state(&self, plugin: &str) -> PluginRegistryResult<LifecycleState> {
        let id = PluginId::parse(plugin)?;
        Ok(self.states.initial_state(&id)?)
    }

    /// Opens the private storage namespace of `plugin` from the host side.
    pub fn plugin_storage(&self, plugin: &str) -> PluginRegistryResult<PluginStorage> {
        let id = PluginId::parse(plugin)?;
        Ok(self.storage.open(&id)?)
    }

    pub fn load(&mut self, plugin: &str, quiet: bool) -> bool {
        self.settle("load", plugin, quiet, Self::try_load)
    }

    pub fn unload(&mut self, plugin: &str, quiet: bool) -> bool {
        self.settle("unload", plugin, quiet, Self::try_unload)
    }

    pub fn start(&mut self, plugin: &str, quiet: bool) -> bool {
        self.settle("start", plugin, quiet, Self::try_start)
    }

    pub fn stop(&mut self, plugin: &str, quiet: bool) -> bool {
        self.settle("stop", plugin, quiet, Self::try_stop)
    }

    /// Loads `plugin`: version gate, dependency injection, storage
    /// provisioning, then the plugin's own `load` hook.
    pub fn try_load(
        &mut self,
        plugin: &str,
        quiet: bool,
    ) -> PluginRegistryResult<LifecycleOutcome> {
        let id = PluginId::parse(plugin)?;
        if self.loaded.contains_key(&id) {
            return Ok(skipped("load", &id, SkipReason::AlreadyLoaded, quiet));
        }

        let mut module = self.read_module(&id, true)?;
        let manifest = module.manifest().clone();

        let host_version = self.host.api_version().to_string();
        let required = &manifest.api_version_required;
        let compatible = match version_gate::matches(self.host.api_version(), required) {
            Ok(compatible) => compatible,
            Err(err) => {
                log!(
                    notice_level(quiet, Level::Warn),
                    "event=plugin_load module=registry status=warn plugin={} reason=invalid_api_range error={}",
                    id,
                    err
                );
                false
            }
        };
        if !compatible {
            let incompatibility = Incompatibility {
                required: required.clone(),
                host: host_version,
            };
            log!(
                notice_level(quiet, Level::Warn),
                "event=plugin_load module=registry status=declined plugin={} required={} host={} message=\"{}\"",
                id,
                incompatibility.required,
                incompatibility.host,
                incompatibility
            );
            return Ok(LifecycleOutcome::Declined(incompatibility));
        }

        self.injector
            .merge(&manifest.dependencies)
            .map_err(|source| PluginError::DependencyInjection {
                plugin: id.clone(),
                source,
            })?;
        let storage = self.storage.open(&id)?;

        if let Some(lifecycle) = module.entry_mut().lifecycle() {
            let host = &self.host;
            if let Err(err) = guard_plugin_call(|| lifecycle.load(host, storage)) {
                return Ok(failed("load", &id, err, quiet));
            }
        }

        self.loaded.insert(id.clone(), module);
        self.record_state(&id, LifecycleState::Loaded);
        self.notify(EVENT_PLUGIN_LOADED, &id);
        log!(
            notice_level(quiet, Level::Info),
            "event=plugin_load module=registry status=ok plugin={} name={} version={}",
            id,
            manifest.name,
            manifest.version
        );
        Ok(LifecycleOutcome::Applied)
    }

    pub fn try_unload(
        &mut self,
        plugin: &str,
        quiet: bool,
    ) -> PluginRegistryResult<LifecycleOutcome> {
        let id = PluginId::parse(plugin)?;
        if !self.loaded.contains_key(&id) {
            return Ok(skipped("unload", &id, SkipReason::NotLoaded, quiet));
        }
        if self.is_running_id(&id) {
            return Ok(skipped("unload", &id, SkipReason::StillRunning, quiet));
        }

        if let Some(module) = self.loaded.get_mut(&id) {
            if let Some(lifecycle) = module.entry_mut().lifecycle() {
                if let Err(err) = guard_plugin_call(|| lifecycle.unload()) {
                    return Ok(failed("unload", &id, err, quiet));
                }
            }
        }

        let label = self
            .loaded
            .remove(&id)
            .map(|module| module.manifest().label())
            .unwrap_or_default();
        self.started.remove(&id);
        let path = self.plugin_path(&id);
        self.loader.invalidate(&path);
        self.record_state(&id, LifecycleState::Unloaded);
        self.notify(EVENT_PLUGIN_UNLOADED, &id);
        log!(
            notice_level(quiet, Level::Info),
            "event=plugin_unload module=registry status=ok plugin={} label=\"{}\"",
            id,
            label
        );
        Ok(LifecycleOutcome::Applied)
    }

    pub fn try_start(
        &mut self,
        plugin: &str,
        quiet: bool,
    ) -> PluginRegistryResult<LifecycleOutcome> {
        let id = PluginId::parse(plugin)?;
        if self.is_running_id(&id) {
            return Ok(skipped("start", &id, SkipReason::AlreadyRunning, quiet));
        }
        let Some(module) = self.loaded.get_mut(&id) else {
            return Ok(skipped("start", &id, SkipReason::NotLoaded, quiet));
        };

        let entry = module.entry_mut();
        if let Err(err) = guard_plugin_call(|| entry.start()) {
            return Ok(failed("start", &id, err, quiet));
        }
        let label = module.manifest().label();

        self.started.insert(id.clone(), true);
        self.record_state(&id, LifecycleState::Running);
        self.notify(EVENT_PLUGIN_STARTED, &id);
        log!(
            notice_level(quiet, Level::Info),
            "event=plugin_start module=registry status=ok plugin={} label=\"{}\"",
            id,
            label
        );
        Ok(LifecycleOutcome::Applied)
    }

    pub fn try_stop(
        &mut self,
        plugin: &str,
        quiet: bool,
    ) -> PluginRegistryResult<LifecycleOutcome> {
        let id = PluginId::parse(plugin)?;
        let running = self.is_running_id(&id);
        let Some(module) = self.loaded.get_mut(&id) else {
            return Ok(skipped("stop", &id, SkipReason::NotLoaded, quiet));
        };
        if !running {
            return Ok(skipped("stop", &id, SkipReason::NotRunning, quiet));
        }

        if let Some(lifecycle) = module.entry_mut().lifecycle() {
            if let Err(err) = guard_plugin_call(|| lifecycle.stop()) {
                return Ok(failed("stop", &id, err, quiet));
            }
        }
        let label = module.manifest().label();

        self.started.insert(id.clone(), false);
        self.record_state(&id, LifecycleState::Loaded);
        self.notify(EVENT_PLUGIN_STOPPED, &id);
        log!(
            notice_level(quiet, Level::Info),
            "event=plugin_stop module=registry status=ok plugin={} label=\"{}\"",
            id,
            label
        );
        Ok(LifecycleOutcome::Applied)
    }

    /// Stops and unloads `plugin` as needed, clears its private storage, then
    /// brings it back to the state it was in before the call.
    ///
    /// A failing reload or restart returns `false` and leaves the plugin in
    /// whatever state that step produced.
    pub fn reset_plugin_storage(&mut self, plugin: &str, quiet: bool) -> bool {
        let id = match PluginId::parse(plugin) {
            Ok(id) => id,
            Err(err) => {
                log!(
                    notice_level(quiet, Level::Error),
                    "event=plugin_storage_reset module=registry status=error plugin={} error={}",
                    plugin,
                    err
                );
                return false;
            }
        };
        let was_running = self.is_running_id(&id);
        let was_loaded = self.loaded.contains_key(&id);

        let stopped = self.stop(id.as_str(), quiet) || !self.is_running_id(&id);
        let released =
            stopped && (self.unload(id.as_str(), quiet) || !self.loaded.contains_key(&id));
        if !released {
            log!(
                notice_level(quiet, Level::Error),
                "event=plugin_storage_reset module=registry status=error plugin={} error_code=release_failed",
                id
            );
            return false;
        }

        if let Err(err) = self.storage.clear(&id) {
            log!(
                notice_level(quiet, Level::Error),
                "event=plugin_storage_reset module=registry status=error plugin={} error_code=clear_failed error={}",
                id,
                err
            );
            return false;
        }

        if was_loaded && !self.load(id.as_str(), quiet) {
            log!(
                notice_level(quiet, Level::Error),
                "event=plugin_storage_reset module=registry status=error plugin={} error_code=reload_failed",
                id
            );
            return false;
        }
        if was_running && !self.start(id.as_str(), quiet) {
            log!(
                notice_level(quiet, Level::Error),
                "event=plugin_storage_reset module=registry status=error plugin={} error_code=restart_failed",
                id
            );
            return false;
        }

        log!(
            notice_level(quiet, Level::Info),
            "event=plugin_storage_reset module=registry status=ok plugin={} reloaded={} restarted={}",
            id,
            was_loaded,
            was_running
        );
        true
    }

    fn settle(
        &mut self,
        operation: &str,
        plugin: &str,
        quiet: bool,
        run: fn(&mut Self, &str, bool) -> PluginRegistryResult<LifecycleOutcome>,
    ) -> bool {
        match run(self, plugin, quiet) {
            Ok(outcome) => outcome.is_applied(),
            Err(err) => {
                log!(
                    notice_level(quiet, Level::Error),
                    "event=plugin_{} module=registry status=error plugin={} error={}",
                    operation,
                    plugin,
                    err
                );
                false
            }
        }
    }

    fn read_module(
        &mut self,
        id: &PluginId,
        force_reload: bool,
    ) -> PluginRegistryResult<PluginModule> {
        let path = self.plugin_path(id);
        if !path.is_file() {
            return Err(PluginError::PluginNotFound(id.clone()));
        }

        let exports = self
            .loader
            .load(&path, force_reload)
            .map_err(|err| PluginError::InvalidPlugin {
                plugin: id.clone(),
                reason: InvalidPluginReason::SyntaxError(err.to_string()),
            })?;
        let Some(manifest) = exports.meta_inf else {
            return Err(PluginError::InvalidPlugin {
                plugin: id.clone(),
                reason: InvalidPluginReason::MissingManifest,
            });
        };
        let Some(entry) = exports.entry else {
            return Err(PluginError::InvalidPlugin {
                plugin: id.clone(),
                reason: InvalidPluginReason::MissingStart,
            });
        };
        Ok(PluginModule::new(manifest, entry))
    }

    fn plugin_path(&self, id: &PluginId) -> PathBuf {
        self.plugins_dir.join(id.as_str())
    }

    fn is_running_id(&self, id: &PluginId) -> bool {
        self.loaded.contains_key(id) && self.started.get(id).copied().unwrap_or(false)
    }

    fn record_state(&self, id: &PluginId, state: LifecycleState) {
        if let Err(err) = self.states.record(id, state) {
            log::error!(
                "event=lifecycle_record module=registry status=error plugin={} state={} error={}",
                id,
                state,
                err
            );
        }
    }

    fn notify(&self, event: &str, id: &PluginId) {
        self.host.emit(event, &[Value::String(id.to_string())]);
    }
}

/// Informational output drops to `debug` in quiet mode.
fn notice_level(quiet: bool, level: Level) -> Level {
    if quiet {
        Level::Debug
    } else {
        level
    }
}

fn skipped(operation: &str, id: &PluginId, reason: SkipReason, quiet: bool) -> LifecycleOutcome {
    log!(
        notice_level(quiet, Level::Info),
        "event=plugin_{} module=registry status=skipped plugin={} reason={}",
        operation,
        id,
        reason.as_str()
    );
    LifecycleOutcome::Skipped(reason)
}

fn failed(
    operation: &str,
    id: &PluginId,
    err: PluginRuntimeError,
    quiet: bool,
) -> LifecycleOutcome {
    log!(
        notice_level(quiet, Level::Error),
        "event=plugin_{} module=registry status=error plugin={} error_code=plugin_hook_failed error={}",
        operation,
        id,
        err
    );
    LifecycleOutcome::Failed(err)
}
