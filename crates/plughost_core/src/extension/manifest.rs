//! Plugin manifest (`meta_inf`) declaration and defaulting.
//!
//! # Invariants
//! - Absent, `null` and empty-string fields fall back to their defaults, so a
//!   manifest read from any descriptor is always fully populated.
//! - The manifest is read-only once the plugin is loaded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name reported for plugins that do not declare one.
pub const DEFAULT_PLUGIN_NAME: &str = "Unnamed Plugin";
/// Version reported for plugins that do not declare one.
pub const DEFAULT_PLUGIN_VERSION: &str = "0.0.0";
/// Display text for plugins without a description.
pub const DEFAULT_PLUGIN_DESCRIPTION: &str = "No Description available";
/// Host API range accepted when a plugin does not declare one.
pub const ANY_API_VERSION: &str = "*";

/// Normalized plugin manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginManifest {
    pub name: String,
    /// Plugin semantic version string.
    pub version: String,
    pub description: Option<String>,
    pub author: Option<String>,
    /// Host dependency name → version range, merged into the host manifest on load.
    pub dependencies: BTreeMap<String, String>,
    /// Range the host API version must satisfy.
    pub api_version_required: String,
}

impl PluginManifest {
    /// Normalizes a raw `meta_inf` JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw: RawManifest = serde_json::from_value(value)?;
        Ok(raw.into())
    }

    pub fn description_or_default(&self) -> &str {
        self.description
            .as_deref()
            .unwrap_or(DEFAULT_PLUGIN_DESCRIPTION)
    }

    /// `name vVERSION` label used in log records.
    pub fn label(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}

impl Default for PluginManifest {
    fn default() -> Self {
        RawManifest::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    dependencies: Option<BTreeMap<String, String>>,
    #[serde(default, alias = "apiVersionRequired")]
    api_version_required: Option<String>,
}

impl From<RawManifest> for PluginManifest {
    fn from(raw: RawManifest) -> Self {
        Self {
            name: non_empty(raw.name).unwrap_or_else(|| DEFAULT_PLUGIN_NAME.to_string()),
            version: non_empty(raw.version).unwrap_or_else(|| DEFAULT_PLUGIN_VERSION.to_string()),
            description: non_empty(raw.description),
            author: non_empty(raw.author),
            dependencies: raw.dependencies.unwrap_or_default(),
            api_version_required: non_empty(raw.api_version_required)
                .unwrap_or_else(|| ANY_API_VERSION.to_string()),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|raw| !raw.trim().is_empty())
}
