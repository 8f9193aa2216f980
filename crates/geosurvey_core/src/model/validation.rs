//! Input normalization rules shared by services and import.
//!
//! # Invariants
//! - Names are trimmed and never blank once accepted.
//! - Keys are derived deterministically from labels.
//! - Colors are `#RGB` or `#RRGGBB` hex strings.

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

static NON_ALNUM_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid key regex"));
static HEX_COLOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#([A-Fa-f0-9]{6}|[A-Fa-f0-9]{3})$").expect("valid color regex")
});

/// Color used when an object type carries no color.
pub const FALLBACK_COLOR: &str = "#cccccc";

/// Validation failures for user-supplied schema input.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Field is empty after trim.
    BlankName(&'static str),
    /// Color is not a `#RGB`/`#RRGGBB` hex string.
    InvalidColor(String),
    /// Label produces an empty key (e.g. only punctuation).
    EmptyKey(String),
    /// Another attribute of the same object type already uses this key.
    DuplicateKey(String),
    /// Attribute type name is not one of the supported kinds.
    UnknownAttributeKind(String),
    /// Observation status name is not supported.
    UnknownStatus(String),
    /// Only select attributes own an option catalog.
    OptionsNotAllowed(&'static str),
    /// Latitude/longitude outside valid degree ranges.
    InvalidCoordinate { latitude: f64, longitude: f64 },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName(field) => write!(f, "{field} must not be blank"),
            Self::InvalidColor(value) => write!(f, "invalid hex color `{value}`"),
            Self::EmptyKey(label) => write!(f, "label `{label}` does not yield a usable key"),
            Self::DuplicateKey(key) => write!(f, "attribute key already in use: `{key}`"),
            Self::UnknownAttributeKind(value) => write!(f, "unknown attribute type `{value}`"),
            Self::UnknownStatus(value) => write!(f, "unknown observation status `{value}`"),
            Self::OptionsNotAllowed(kind) => {
                write!(f, "attribute type `{kind}` has no option catalog")
            }
            Self::InvalidCoordinate {
                latitude,
                longitude,
            } => write!(f, "coordinate out of range: ({latitude}, {longitude})"),
        }
    }
}

impl Error for ValidationError {}

/// Derives a machine-safe attribute key from a display label.
///
/// Lowercases, collapses every run of non-alphanumeric characters into a
/// single `_`, then trims leading/trailing `_`.
pub fn derive_key(label: &str) -> String {
    let lowered = label.to_lowercase();
    NON_ALNUM_RUN_RE
        .replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string()
}

/// Trims `value` and rejects blank input.
pub fn normalize_name(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::BlankName(field));
    }
    Ok(trimmed.to_string())
}

/// Normalizes an optional color; blank input means "no color".
///
/// A missing `#` prefix is added before validation.
pub fn normalize_color(value: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(raw) = value.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    let candidate = if raw.starts_with('#') {
        raw.to_string()
    } else {
        format!("#{raw}")
    };
    if !HEX_COLOR_RE.is_match(&candidate) {
        return Err(ValidationError::InvalidColor(raw.to_string()));
    }
    Ok(Some(candidate))
}

/// Checks latitude/longitude degree ranges.
pub fn validate_coordinate(latitude: f64, longitude: f64) -> Result<(), ValidationError> {
    let lat_ok = latitude.is_finite() && (-90.0..=90.0).contains(&latitude);
    let lon_ok = longitude.is_finite() && (-180.0..=180.0).contains(&longitude);
    if lat_ok && lon_ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidCoordinate {
            latitude,
            longitude,
        })
    }
}
