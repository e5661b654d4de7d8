//! Descriptor-based module loader.
//!
//! Plugin files are JSON descriptors: a `meta_inf` manifest block plus an
//! `entry` naming a plugin implementation compiled into the host and
//! registered here. Loading a file parses the descriptor (cached per path)
//! and instantiates a fresh plugin from the registered factory.

use crate::extension::builtin::{EchoPlugin, ECHO_ENTRY};
use crate::extension::manifest::PluginManifest;
use crate::extension::module::{ModuleExports, ModuleLoadError, ModuleLoader, Plugin};
use log::debug;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Constructs a fresh plugin instance.
pub type EntryFactory = Box<dyn Fn() -> Box<dyn Plugin>>;

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(default)]
    meta_inf: Option<serde_json::Value>,
    #[serde(default)]
    entry: Option<String>,
}

#[derive(Debug, Clone)]
struct ParsedDescriptor {
    manifest: Option<PluginManifest>,
    entry: Option<String>,
}

/// `ModuleLoader` resolving descriptors to registered entry factories.
#[derive(Default)]
pub struct BuiltinModuleLoader {
    factories: BTreeMap<String, EntryFactory>,
    cache: HashMap<PathBuf, ParsedDescriptor>,
}

impl BuiltinModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader with the first-party baseline entries registered.
    pub fn with_first_party_baseline() -> Self {
        let mut loader = Self::new();
        loader.factories.insert(
            ECHO_ENTRY.to_string(),
            Box::new(|| -> Box<dyn Plugin> { Box::new(EchoPlugin::default()) }),
        );
        loader
    }

    /// Registers one entry factory under `entry`.
    pub fn register(
        &mut self,
        entry: &str,
        factory: impl Fn() -> Box<dyn Plugin> + 'static,
    ) -> Result<(), EntryRegistrationError> {
        let entry = entry.trim();
        if !is_valid_entry_name(entry) {
            return Err(EntryRegistrationError::InvalidEntryName(entry.to_string()));
        }
        if self.factories.contains_key(entry) {
            return Err(EntryRegistrationError::DuplicateEntry(entry.to_string()));
        }
        self.factories.insert(entry.to_string(), Box::new(factory));
        Ok(())
    }

    /// Returns sorted registered entry names.
    pub fn entries(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn is_cached(&self, path: &Path) -> bool {
        self.cache.contains_key(path)
    }

    fn parse_descriptor(path: &Path) -> Result<ParsedDescriptor, ModuleLoadError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ModuleLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let descriptor: Descriptor =
            serde_json::from_str(&raw).map_err(|err| ModuleLoadError::Syntax {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;

        let manifest = match descriptor.meta_inf {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => Some(PluginManifest::from_value(value).map_err(|err| {
                ModuleLoadError::Syntax {
                    path: path.to_path_buf(),
                    message: format!("malformed meta_inf block: {err}"),
                }
            })?),
        };
        let entry = descriptor
            .entry
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty());

        Ok(ParsedDescriptor { manifest, entry })
    }
}

impl ModuleLoader for BuiltinModuleLoader {
    fn load(&mut self, path: &Path, force_reload: bool) -> Result<ModuleExports, ModuleLoadError> {
        let parsed = match self.cache.get(path) {
            Some(cached) if !force_reload => cached.clone(),
            _ => {
                let parsed = Self::parse_descriptor(path)?;
                debug!(
                    "event=module_parse module=loader status=ok path={} forced={}",
                    path.display(),
                    force_reload
                );
                self.cache.insert(path.to_path_buf(), parsed.clone());
                parsed
            }
        };

        let entry = match parsed.entry.as_deref() {
            None => None,
            Some(name) => {
                let factory =
                    self.factories
                        .get(name)
                        .ok_or_else(|| ModuleLoadError::UnknownEntry {
                            path: path.to_path_buf(),
                            entry: name.to_string(),
                        })?;
                Some(factory())
            }
        };

        Ok(ModuleExports {
            meta_inf: parsed.manifest,
            entry,
        })
    }

    fn invalidate(&mut self, path: &Path) {
        self.cache.remove(path);
    }
}

fn is_valid_entry_name(value: &str) -> bool {
    let mut chars = value.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return false;
    }

    let mut prev_separator = false;
    for c in chars {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_separator = false;
            continue;
        }
        if c == '.' || c == '_' || c == '-' {
            if prev_separator {
                return false;
            }
            prev_separator = true;
            continue;
        }
        return false;
    }
    !prev_separator
}

/// Entry factory registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRegistrationError {
    InvalidEntryName(String),
    DuplicateEntry(String),
}

impl Display for EntryRegistrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEntryName(value) => write!(f, "plugin entry name is invalid: {value}"),
            Self::DuplicateEntry(value) => write!(f, "plugin entry already registered: {value}"),
        }
    }
}

impl Error for EntryRegistrationError {}
