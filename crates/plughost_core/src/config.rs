//! Host configuration and directory layout.
//!
//! # Responsibility
//! - Hold the knobs the plugin host needs: base directory, running API
//!   version, directory layout, host manifest location, install command.
//! - Derive every on-disk path from one base directory.
//!
//! # Invariants
//! - Subdirectories are relative to `base_dir`.
//! - `api_version` is a valid semantic version once `validate` passed.

use crate::extension::version_gate::parse_version;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Host API version assumed when none is configured.
pub const DEFAULT_API_VERSION: &str = "1.0.0";
const DEFAULT_PLUGINS_SUBDIR: &str = "plugins";
const DEFAULT_STORAGE_SUBDIR: &str = "storage";
const DEFAULT_HOST_MANIFEST: &str = "host-manifest.json";
const LIFECYCLE_STORE_FILE_NAME: &str = "plugin_loader.sqlite3";
const PLUGIN_STORAGE_SUBDIR: &str = "plugins";
const LOG_SUBDIR: &str = "logs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub base_dir: PathBuf,
    pub api_version: String,
    pub plugins_subdir: PathBuf,
    pub storage_subdir: PathBuf,
    /// Host manifest path; relative values resolve against `base_dir`.
    pub host_manifest: PathBuf,
    /// `[program, args...]` run after the host manifest changed. Empty skips
    /// installation.
    pub install_command: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            api_version: DEFAULT_API_VERSION.to_string(),
            plugins_subdir: PathBuf::from(DEFAULT_PLUGINS_SUBDIR),
            storage_subdir: PathBuf::from(DEFAULT_STORAGE_SUBDIR),
            host_manifest: PathBuf::from(DEFAULT_HOST_MANIFEST),
            install_command: Vec::new(),
        }
    }
}

impl HostConfig {
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Reads a JSON config file. A relative `base_dir` resolves against the
    /// directory containing the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if config.base_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.base_dir = parent.join(&config.base_dir);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_version()?;
        for (field, value) in [
            ("plugins_subdir", &self.plugins_subdir),
            ("storage_subdir", &self.storage_subdir),
        ] {
            if value.as_os_str().is_empty() || value.is_absolute() {
                return Err(ConfigError::InvalidSubdir {
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    /// Parsed host API version.
    pub fn api_version(&self) -> Result<Version, ConfigError> {
        parse_version(&self.api_version).map_err(|err| ConfigError::InvalidApiVersion {
            value: self.api_version.clone(),
            reason: err.to_string(),
        })
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.base_dir.join(&self.plugins_subdir)
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.base_dir.join(&self.storage_subdir)
    }

    /// Root of the per-plugin private namespaces.
    pub fn plugin_storage_dir(&self) -> PathBuf {
        self.storage_dir().join(PLUGIN_STORAGE_SUBDIR)
    }

    pub fn lifecycle_store_path(&self) -> PathBuf {
        self.storage_dir().join(LIFECYCLE_STORE_FILE_NAME)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.base_dir.join(LOG_SUBDIR)
    }

    pub fn host_manifest_path(&self) -> PathBuf {
        if self.host_manifest.is_absolute() {
            self.host_manifest.clone()
        } else {
            self.base_dir.join(&self.host_manifest)
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    InvalidApiVersion {
        value: String,
        reason: String,
    },
    InvalidSubdir {
        field: &'static str,
        value: PathBuf,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse config `{}`: {source}", path.display())
            }
            Self::InvalidApiVersion { value, reason } => {
                write!(f, "api_version `{value}` is not a semantic version: {reason}")
            }
            Self::InvalidSubdir { field, value } => write!(
                f,
                "{field} must be a non-empty relative path, got `{}`",
                value.display()
            ),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::InvalidApiVersion { .. } | Self::InvalidSubdir { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, HostConfig};
    use semver::Version;
    use std::path::PathBuf;

    #[test]
    fn derives_layout_from_base_dir() {
        let config = HostConfig::with_base_dir("/srv/host");
        assert_eq!(config.plugins_dir(), PathBuf::from("/srv/host/plugins"));
        assert_eq!(
            config.plugin_storage_dir(),
            PathBuf::from("/srv/host/storage/plugins")
        );
        assert_eq!(
            config.lifecycle_store_path(),
            PathBuf::from("/srv/host/storage/plugin_loader.sqlite3")
        );
        assert_eq!(
            config.host_manifest_path(),
            PathBuf::from("/srv/host/host-manifest.json")
        );
        assert_eq!(config.log_dir(), PathBuf::from("/srv/host/logs"));
        assert_eq!(config.api_version().expect("default"), Version::new(1, 0, 0));
    }

    #[test]
    fn loads_partial_file_with_defaults_and_relative_base() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("plughost.json");
        std::fs::write(
            &path,
            r#"{ "base_dir": "host", "api_version": "2.1.0", "install_command": ["npm", "install"] }"#,
        )
        .expect("write config");

        let config = HostConfig::load(&path).expect("load config");
        assert_eq!(config.base_dir, dir.path().join("host"));
        assert_eq!(config.api_version().expect("version"), Version::new(2, 1, 0));
        assert_eq!(config.install_command, vec!["npm", "install"]);
        assert_eq!(config.plugins_subdir, PathBuf::from("plugins"));
    }

    #[test]
    fn rejects_invalid_values() {
        let mut config = HostConfig::with_base_dir("/srv/host");
        config.api_version = "one".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidApiVersion { .. })
        ));

        let mut config = HostConfig::with_base_dir("/srv/host");
        config.plugins_subdir = PathBuf::from("/abs");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSubdir {
                field: "plugins_subdir",
                ..
            })
        ));
    }

    #[test]
    fn reports_unparseable_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("plughost.json");
        std::fs::write(&path, "not json").expect("write");
        assert!(matches!(
            HostConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
