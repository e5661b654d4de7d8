//! Host dependency manifest injection.
//!
//! # Responsibility
//! - Merge plugin-declared dependency requirements into the host manifest.
//! - Run the host's installation step synchronously when the manifest changed.
//!
//! # Invariants
//! - Requirements already present in the host manifest are never overwritten.
//! - Installation completes (or fails) before `merge` returns.
//! - A failed installation leaves the host manifest as it was before `merge`.
//! - Unrelated manifest keys and their order survive the rewrite.

use log::{error, info, warn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::Command;

const DEPENDENCIES_KEY: &str = "dependencies";

/// Host dependency installation capability.
pub trait DependencyInstaller {
    /// Resolves/installs the dependencies declared in `manifest_path`.
    fn install(&mut self, manifest_path: &Path) -> Result<(), InstallError>;
}

/// Runs an external install command in the host base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl CommandInstaller {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: working_dir.into(),
        }
    }

    /// Builds an installer from `[program, args...]`; `None` when empty.
    pub fn from_command_line(command: &[String], working_dir: impl Into<PathBuf>) -> Option<Self> {
        let (program, args) = command.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self::new(program.clone(), args.to_vec(), working_dir))
    }
}

impl DependencyInstaller for CommandInstaller {
    fn install(&mut self, manifest_path: &Path) -> Result<(), InstallError> {
        info!(
            "event=dependency_install module=injector status=start program={} manifest={}",
            self.program,
            manifest_path.display()
        );
        let status = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .status()
            .map_err(|source| InstallError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(InstallError::ExitStatus {
                program: self.program.clone(),
                code: status.code(),
            });
        }
        info!(
            "event=dependency_install module=injector status=ok program={}",
            self.program
        );
        Ok(())
    }
}

/// Installer used when no install command is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipInstaller;

impl DependencyInstaller for SkipInstaller {
    fn install(&mut self, manifest_path: &Path) -> Result<(), InstallError> {
        warn!(
            "event=dependency_install module=injector status=skipped reason=no_install_command manifest={}",
            manifest_path.display()
        );
        Ok(())
    }
}

/// Merges plugin requirements into the host manifest file.
pub struct ManifestInjector {
    manifest_path: PathBuf,
    installer: Box<dyn DependencyInstaller>,
}

impl ManifestInjector {
    pub fn new(manifest_path: impl Into<PathBuf>, installer: Box<dyn DependencyInstaller>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            installer,
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Adds every requirement missing from the host manifest and installs when
    /// anything was added. Returns the number of injected entries.
    pub fn merge(&mut self, requirements: &BTreeMap<String, String>) -> Result<usize, InjectError> {
        if requirements.is_empty() {
            return Ok(0);
        }

        let original = self.read_raw()?;
        let mut manifest = self.parse_manifest(original.as_deref())?;
        let dependencies = dependencies_mut(&mut manifest, &self.manifest_path)?;

        let mut injected = 0;
        for (name, range) in requirements {
            if dependencies.contains_key(name) {
                continue;
            }
            info!(
                "event=dependency_inject module=injector status=ok dependency={} range={}",
                name, range
            );
            dependencies.insert(name.clone(), Value::String(range.clone()));
            injected += 1;
        }

        if injected > 0 {
            self.write_manifest(&manifest)?;
            info!(
                "event=dependency_inject module=injector status=written injected={} manifest={}",
                injected,
                self.manifest_path.display()
            );
            if let Err(err) = self.installer.install(&self.manifest_path) {
                self.restore_manifest(original.as_deref());
                return Err(InjectError::Install(err));
            }
        }
        Ok(injected)
    }

    /// Dependencies currently declared by the host manifest.
    pub fn declared_dependencies(&self) -> Result<BTreeMap<String, String>, InjectError> {
        let mut manifest = self.read_manifest()?;
        let dependencies = dependencies_mut(&mut manifest, &self.manifest_path)?;
        Ok(dependencies
            .iter()
            .map(|(name, range)| {
                let range = match range {
                    Value::String(value) => value.clone(),
                    other => other.to_string(),
                };
                (name.clone(), range)
            })
            .collect())
    }

    fn read_manifest(&self) -> Result<Map<String, Value>, InjectError> {
        let raw = self.read_raw()?;
        self.parse_manifest(raw.as_deref())
    }

    /// Current manifest body, `None` when the file does not exist.
    fn read_raw(&self) -> Result<Option<String>, InjectError> {
        match std::fs::read_to_string(&self.manifest_path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(InjectError::Io {
                path: self.manifest_path.clone(),
                source,
            }),
        }
    }

    fn parse_manifest(&self, raw: Option<&str>) -> Result<Map<String, Value>, InjectError> {
        let Some(raw) = raw else {
            return Ok(Map::new());
        };
        match serde_json::from_str::<Value>(raw).map_err(|source| InjectError::Json {
            path: self.manifest_path.clone(),
            source,
        })? {
            Value::Object(map) => Ok(map),
            _ => Err(InjectError::MalformedManifest {
                path: self.manifest_path.clone(),
                reason: "top-level value must be an object".to_string(),
            }),
        }
    }

    /// Puts back the body read before a failed installation.
    fn restore_manifest(&self, original: Option<&str>) {
        let restored = match original {
            Some(raw) => std::fs::write(&self.manifest_path, raw),
            None => std::fs::remove_file(&self.manifest_path),
        };
        match restored {
            Ok(()) => warn!(
                "event=dependency_inject module=injector status=rolled_back manifest={}",
                self.manifest_path.display()
            ),
            Err(err) => error!(
                "event=dependency_inject module=injector status=error error_code=rollback_failed manifest={} error={}",
                self.manifest_path.display(),
                err
            ),
        }
    }

    fn write_manifest(&self, manifest: &Map<String, Value>) -> Result<(), InjectError> {
        let mut body = serde_json::to_string_pretty(manifest).map_err(|source| InjectError::Json {
            path: self.manifest_path.clone(),
            source,
        })?;
        body.push('\n');
        if let Some(parent) = self.manifest_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| InjectError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        std::fs::write(&self.manifest_path, body).map_err(|source| InjectError::Io {
            path: self.manifest_path.clone(),
            source,
        })
    }
}

fn dependencies_mut<'a>(
    manifest: &'a mut Map<String, Value>,
    path: &Path,
) -> Result<&'a mut Map<String, Value>, InjectError> {
    match manifest
        .entry(DEPENDENCIES_KEY)
        .or_insert_with(|| Value::Object(Map::new()))
    {
        Value::Object(dependencies) => Ok(dependencies),
        _ => Err(InjectError::MalformedManifest {
            path: path.to_path_buf(),
            reason: format!("`{DEPENDENCIES_KEY}` must be an object"),
        }),
    }
}

/// Installation step failures.
#[derive(Debug)]
pub enum InstallError {
    Spawn {
        program: String,
        source: std::io::Error,
    },
    ExitStatus {
        program: String,
        code: Option<i32>,
    },
    Failed(String),
}

impl Display for InstallError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn { program, source } => {
                write!(f, "failed to run install command `{program}`: {source}")
            }
            Self::ExitStatus { program, code } => match code {
                Some(code) => write!(f, "install command `{program}` exited with status {code}"),
                None => write!(f, "install command `{program}` was terminated by a signal"),
            },
            Self::Failed(message) => write!(f, "dependency installation failed: {message}"),
        }
    }
}

impl Error for InstallError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn { source, .. } => Some(source),
            Self::ExitStatus { .. } | Self::Failed(_) => None,
        }
    }
}

/// Host manifest injection failures.
#[derive(Debug)]
pub enum InjectError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    MalformedManifest {
        path: PathBuf,
        reason: String,
    },
    Install(InstallError),
}

impl Display for InjectError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "host manifest i/o failed at `{}`: {source}", path.display())
            }
            Self::Json { path, source } => {
                write!(f, "host manifest `{}` is not valid JSON: {source}", path.display())
            }
            Self::MalformedManifest { path, reason } => {
                write!(f, "host manifest `{}` is malformed: {reason}", path.display())
            }
            Self::Install(err) => write!(f, "{err}"),
        }
    }
}

impl Error for InjectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::MalformedManifest { .. } => None,
            Self::Install(err) => Some(err),
        }
    }
}
