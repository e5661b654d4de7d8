//! Host API compatibility gate.
//!
//! Ranges use the npm-style syntax plugin authors already write
//! (`^1.2.0`, `~1.2`, `>=1.0.0 <2.0.0`, `1.x`, `1.0.0 - 1.4.0`, `^1 || ^2`)
//! and are translated onto `semver::VersionReq`.
//!
//! # Invariants
//! - Pure: no I/O, no global state.
//! - A bare full version (`1.2.3`) matches exactly that version.
//! - Unparseable input never satisfies.

use once_cell::sync::Lazy;
use regex::Regex;
use semver::{Version, VersionReq};
use std::error::Error;
use std::fmt::{Display, Formatter};

static HYPHEN_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\S+)\s+-\s+(\S+)\s*$").expect("valid hyphen range regex")
});
static OPERATOR_GAP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(>=|<=|>|<|=|~|\^)\s+").expect("valid operator gap regex"));

/// Returns whether `current` satisfies `range`. Invalid input yields `false`.
pub fn satisfies(current: &str, range: &str) -> bool {
    check(current, range).unwrap_or(false)
}

/// Parses both sides and evaluates the range.
pub fn check(current: &str, range: &str) -> Result<bool, VersionGateError> {
    let version = parse_version(current)?;
    matches(&version, range)
}

/// Evaluates `range` against an already parsed version.
pub fn matches(version: &Version, range: &str) -> Result<bool, VersionGateError> {
    let alternatives = parse_range(range)?;
    Ok(alternatives.iter().any(|req| req.matches(version)))
}

/// Parses a version string, tolerating a leading `v`.
pub fn parse_version(value: &str) -> Result<Version, VersionGateError> {
    let trimmed = value.trim();
    let normalized = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
    Version::parse(normalized).map_err(|err| VersionGateError::InvalidVersion {
        value: value.to_string(),
        reason: err.to_string(),
    })
}

/// Parses a range into its `||` alternatives.
pub fn parse_range(range: &str) -> Result<Vec<VersionReq>, VersionGateError> {
    range
        .split("||")
        .map(|alternative| parse_alternative(range, alternative))
        .collect()
}

fn parse_alternative(range: &str, alternative: &str) -> Result<VersionReq, VersionGateError> {
    let trimmed = alternative.trim();
    if trimmed.is_empty() || matches!(trimmed, "*" | "x" | "X") {
        return Ok(VersionReq::STAR);
    }

    let comparators: Vec<String> = match HYPHEN_RANGE_RE.captures(trimmed) {
        Some(caps) => vec![
            format!(">={}", strip_wildcards(&caps[1])),
            format!("<={}", strip_wildcards(&caps[2])),
        ],
        None => OPERATOR_GAP_RE
            .replace_all(trimmed, "$1")
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .map(normalize_comparator)
            .collect(),
    };

    VersionReq::parse(&comparators.join(", ")).map_err(|err| VersionGateError::InvalidRange {
        value: range.to_string(),
        reason: err.to_string(),
    })
}

fn normalize_comparator(token: &str) -> String {
    let split_at = token
        .find(|c: char| c.is_ascii_alphanumeric() || c == '*')
        .unwrap_or(token.len());
    let (op, rest) = token.split_at(split_at);
    let version = strip_wildcards(rest.strip_prefix(['v', 'V']).unwrap_or(rest));

    if version.is_empty() {
        return "*".to_string();
    }
    if !op.is_empty() {
        return format!("{op}{version}");
    }

    let core = version.split(['-', '+']).next().unwrap_or(version);
    match core.split('.').count() {
        1 => format!("^{version}"),
        2 => format!("~{version}"),
        _ => format!("={version}"),
    }
}

/// Drops `x`/`X`/`*` components and everything after them: `1.2.x` → `1.2`.
fn strip_wildcards(version: &str) -> &str {
    let mut end = 0;
    for (index, part) in version.split('.').enumerate() {
        if matches!(part, "x" | "X" | "*") {
            break;
        }
        end += part.len() + usize::from(index > 0);
    }
    &version[..end]
}

/// Version gate parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionGateError {
    InvalidVersion { value: String, reason: String },
    InvalidRange { value: String, reason: String },
}

impl Display for VersionGateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidVersion { value, reason } => {
                write!(f, "invalid semantic version `{value}`: {reason}")
            }
            Self::InvalidRange { value, reason } => {
                write!(f, "invalid version range `{value}`: {reason}")
            }
        }
    }
}

impl Error for VersionGateError {}

#[cfg(test)]
mod tests {
    use super::{check, satisfies, strip_wildcards, VersionGateError};

    #[test]
    fn any_version_ranges_match() {
        assert!(satisfies("1.0.0", "*"));
        assert!(satisfies("0.0.1", ""));
        assert!(satisfies("7.3.1", "x"));
    }

    #[test]
    fn caret_and_tilde_ranges() {
        assert!(satisfies("1.4.2", "^1.0.0"));
        assert!(!satisfies("2.0.0", "^1.0.0"));
        assert!(satisfies("1.2.9", "~1.2.3"));
        assert!(!satisfies("1.3.0", "~1.2.3"));
    }

    #[test]
    fn comparator_sets_with_spaces() {
        assert!(satisfies("1.5.0", ">=1.0.0 <2.0.0"));
        assert!(!satisfies("2.0.0", ">=1.0.0 <2.0.0"));
        assert!(satisfies("1.0.0", ">= 1.0.0"));
        assert!(!satisfies("1.0.0", ">=2.0.0"));
    }

    #[test]
    fn bare_versions_are_exact_and_partials_are_x_ranges() {
        assert!(satisfies("1.0.0", "1.0.0"));
        assert!(!satisfies("1.0.1", "1.0.0"));
        assert!(satisfies("1.9.0", "1"));
        assert!(!satisfies("2.0.0", "1.x"));
        assert!(satisfies("1.2.7", "1.2.x"));
        assert!(!satisfies("1.3.0", "1.2"));
    }

    #[test]
    fn hyphen_ranges_and_alternatives() {
        assert!(satisfies("1.3.0", "1.0.0 - 1.4.0"));
        assert!(!satisfies("1.4.1", "1.0.0 - 1.4.0"));
        assert!(satisfies("1.1.0", "^2.0.0 || ^1.0.0"));
        assert!(!satisfies("3.0.0", "^2.0.0 || ^1.0.0"));
    }

    #[test]
    fn leading_v_is_tolerated() {
        assert!(satisfies("v1.0.0", "^1.0.0"));
        assert!(satisfies("1.0.0", ">=v1.0.0"));
    }

    #[test]
    fn invalid_input_never_satisfies() {
        assert!(!satisfies("not-a-version", "*"));
        assert!(!satisfies("1.0.0", ">=banana"));
        assert!(matches!(
            check("1.0.0", ">=banana"),
            Err(VersionGateError::InvalidRange { .. })
        ));
        assert!(matches!(
            check("1.0", "*"),
            Err(VersionGateError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn strips_wildcard_components() {
        assert_eq!(strip_wildcards("1.2.x"), "1.2");
        assert_eq!(strip_wildcards("1.*"), "1");
        assert_eq!(strip_wildcards("X"), "");
        assert_eq!(strip_wildcards("1.2.3"), "1.2.3");
    }
}
