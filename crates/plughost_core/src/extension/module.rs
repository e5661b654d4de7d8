//! Plugin module contract and the module loading seam.
//!
//! # Responsibility
//! - Define what a loaded plugin must (start) and may (load/stop/unload) do.
//! - Define how plugin files become executable modules (`ModuleLoader`).
//!
//! # Invariants
//! - A `PluginModule` always carries a manifest and a start-capable entry;
//!   incomplete exports never become modules.
//! - Plugin code failures, including panics, surface as `PluginRuntimeError`.

use crate::extension::host::HostApi;
use crate::extension::manifest::PluginManifest;
use crate::store::plugin_storage::PluginStorage;
use std::any::Any;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

pub type PluginResult<T> = Result<T, PluginRuntimeError>;

/// Failure raised by plugin-authored code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRuntimeError {
    message: String,
}

impl PluginRuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let detail = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(format!("plugin panicked: {detail}"))
    }
}

impl Display for PluginRuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for PluginRuntimeError {}

/// Required plugin contract.
pub trait Plugin {
    fn start(&mut self) -> PluginResult<()>;

    /// Optional lifecycle capabilities. Start-only plugins keep the default.
    fn lifecycle(&mut self) -> Option<&mut dyn PluginLifecycle> {
        None
    }
}

/// Optional lifecycle hooks of a full-lifecycle plugin.
pub trait PluginLifecycle {
    /// Called once per load with the host capability object and the plugin's
    /// private storage namespace.
    fn load(&mut self, _host: &HostApi, _storage: PluginStorage) -> PluginResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> PluginResult<()> {
        Ok(())
    }

    fn unload(&mut self) -> PluginResult<()> {
        Ok(())
    }
}

/// Runs plugin code, converting panics into `PluginRuntimeError`.
pub fn guard_plugin_call<T>(call: impl FnOnce() -> PluginResult<T>) -> PluginResult<T> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(PluginRuntimeError::from_panic(payload.as_ref())),
    }
}

/// What a plugin file exports once executed.
#[derive(Default)]
pub struct ModuleExports {
    /// Parsed `meta_inf` block.
    pub meta_inf: Option<PluginManifest>,
    /// Start-capable entry; `None` when the module exports no start.
    pub entry: Option<Box<dyn Plugin>>,
}

/// Loads plugin files into executable exports.
pub trait ModuleLoader {
    /// Loads `path`. Implementations may serve a cached parse unless
    /// `force_reload` is set; the returned entry is always a fresh instance.
    fn load(&mut self, path: &Path, force_reload: bool) -> Result<ModuleExports, ModuleLoadError>;

    /// Drops any cached state for `path`.
    fn invalidate(&mut self, path: &Path);
}

/// Loaded plugin: validated manifest plus its live entry instance.
pub struct PluginModule {
    manifest: PluginManifest,
    entry: Box<dyn Plugin>,
}

impl PluginModule {
    pub fn new(manifest: PluginManifest, entry: Box<dyn Plugin>) -> Self {
        Self { manifest, entry }
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    pub(crate) fn entry_mut(&mut self) -> &mut dyn Plugin {
        self.entry.as_mut()
    }
}

impl Debug for PluginModule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginModule")
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

/// Module loading failures (unreadable file, syntax, unresolved entry).
#[derive(Debug)]
pub enum ModuleLoadError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Syntax {
        path: PathBuf,
        message: String,
    },
    UnknownEntry {
        path: PathBuf,
        entry: String,
    },
}

impl Display for ModuleLoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read plugin file `{}`: {source}", path.display())
            }
            Self::Syntax { path, message } => {
                write!(f, "plugin file `{}` has a syntax error: {message}", path.display())
            }
            Self::UnknownEntry { path, entry } => write!(
                f,
                "plugin file `{}` references unknown entry `{entry}`",
                path.display()
            ),
        }
    }
}

impl Error for ModuleLoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Syntax { .. } | Self::UnknownEntry { .. } => None,
        }
    }
}
