//! Canonical plugin identifiers.
//!
//! A plugin is addressed by the file name of its descriptor inside the plugins
//! directory. Callers may omit the `.plugin.json` suffix; every lookup goes
//! through [`PluginId::parse`] so `echo` and `echo.plugin.json` name the same
//! plugin.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Fixed file suffix of plugin descriptors. Matched case-insensitively.
pub const PLUGIN_FILE_SUFFIX: &str = ".plugin.json";

/// Canonical plugin identifier (descriptor file name, suffix included).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PluginId(String);

impl PluginId {
    /// Canonicalizes `raw`, appending the suffix when it is missing.
    pub fn parse(raw: &str) -> Result<Self, PluginIdError> {
        if raw.trim().is_empty() {
            return Err(PluginIdError::Empty);
        }
        if raw.contains(['/', '\\']) || raw == "." || raw == ".." {
            return Err(PluginIdError::InvalidCharacters(raw.to_string()));
        }

        let canonical = if has_plugin_suffix(raw) {
            raw.to_string()
        } else {
            format!("{raw}{PLUGIN_FILE_SUFFIX}")
        };
        if canonical.len() == PLUGIN_FILE_SUFFIX.len() {
            return Err(PluginIdError::Empty);
        }
        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name without the descriptor suffix.
    pub fn stem(&self) -> &str {
        &self.0[..self.0.len() - PLUGIN_FILE_SUFFIX.len()]
    }
}

impl Display for PluginId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PluginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Returns whether `name` ends with [`PLUGIN_FILE_SUFFIX`], ignoring ASCII case.
pub fn has_plugin_suffix(name: &str) -> bool {
    let suffix_len = PLUGIN_FILE_SUFFIX.len();
    if name.len() < suffix_len {
        return false;
    }
    let split_at = name.len() - suffix_len;
    name.is_char_boundary(split_at) && name[split_at..].eq_ignore_ascii_case(PLUGIN_FILE_SUFFIX)
}

/// Identifier parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginIdError {
    Empty,
    InvalidCharacters(String),
}

impl Display for PluginIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "plugin id must not be empty"),
            Self::InvalidCharacters(value) => {
                write!(f, "plugin id must be a plain file name: {value}")
            }
        }
    }
}

impl Error for PluginIdError {}

#[cfg(test)]
mod tests {
    use super::{has_plugin_suffix, PluginId, PluginIdError};

    #[test]
    fn appends_missing_suffix() {
        let id = PluginId::parse("echo").expect("echo parses");
        assert_eq!(id.as_str(), "echo.plugin.json");
        assert_eq!(id.stem(), "echo");
    }

    #[test]
    fn keeps_existing_suffix_regardless_of_case() {
        let id = PluginId::parse("Echo.PLUGIN.Json").expect("mixed case parses");
        assert_eq!(id.as_str(), "Echo.PLUGIN.Json");
        assert_eq!(id.stem(), "Echo");
    }

    #[test]
    fn remainder_stays_case_sensitive() {
        let lower = PluginId::parse("echo").expect("lower");
        let upper = PluginId::parse("Echo").expect("upper");
        assert_ne!(lower, upper);
        assert_eq!(lower, PluginId::parse("echo.plugin.json").expect("suffixed"));
    }

    #[test]
    fn rejects_empty_and_path_like_ids() {
        assert_eq!(PluginId::parse("  "), Err(PluginIdError::Empty));
        assert_eq!(PluginId::parse(".plugin.json"), Err(PluginIdError::Empty));
        assert!(matches!(
            PluginId::parse("../escape"),
            Err(PluginIdError::InvalidCharacters(_))
        ));
        assert!(matches!(
            PluginId::parse("nested/echo"),
            Err(PluginIdError::InvalidCharacters(_))
        ));
    }

    #[test]
    fn suffix_check_handles_short_and_multibyte_names() {
        assert!(!has_plugin_suffix("json"));
        assert!(has_plugin_suffix("ünïcode.plugin.json"));
        assert!(!has_plugin_suffix("ünïcode.plugin.js"));
    }
}
