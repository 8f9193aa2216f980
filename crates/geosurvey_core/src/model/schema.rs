//! Form schema records: object types, attributes and select options.
//!
//! # Responsibility
//! - Describe what a user can record for one kind of mapped object.
//!
//! # Invariants
//! - `Attribute::key` is unique within its object type.
//! - Only `AttributeKind::Select` attributes own `AttributeOption` rows.
//! - Boolean attributes accept exactly the answers `True` and `False`.
//!
//! # See also
//! - `model::validation::derive_key`

use super::project::ProjectId;
use super::validation::{ValidationError, FALLBACK_COLOR};
use serde::{Deserialize, Serialize};

pub type ObjectTypeId = i64;
pub type AttributeId = i64;
pub type AttributeOptionId = i64;

/// Fixed answers for boolean attributes.
pub const BOOLEAN_ANSWERS: &[&str] = &["True", "False"];

/// Value type of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Text,
    Number,
    Boolean,
    Date,
    Image,
    /// One answer out of the attribute's option catalog.
    Select,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 6] = [
        AttributeKind::Text,
        AttributeKind::Number,
        AttributeKind::Boolean,
        AttributeKind::Date,
        AttributeKind::Image,
        AttributeKind::Select,
    ];

    /// Storage/CSV spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Image => "image",
            Self::Select => "select",
        }
    }

    /// Parses the storage spelling, case-insensitively.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnknownAttributeKind(value.to_string()))
    }

    /// Returns the fixed answer set, if this kind has one.
    pub fn allowed_answers(self) -> Option<&'static [&'static str]> {
        match self {
            Self::Boolean => Some(BOOLEAN_ANSWERS),
            _ => None,
        }
    }

    /// Whether this kind owns a select-option catalog.
    pub fn has_options(self) -> bool {
        self == Self::Select
    }
}

/// Object type ("card") schema owned by one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectType {
    pub id: ObjectTypeId,
    pub project_id: ProjectId,
    pub name: String,
    /// `#RGB`/`#RRGGBB`; `None` renders with the fallback color.
    pub color: Option<String>,
    pub order_index: i64,
}

impl ObjectType {
    /// Marker color, falling back to `FALLBACK_COLOR` when none is set.
    pub fn display_color(&self) -> &str {
        display_color(self.color.as_deref())
    }
}

/// `color` or `FALLBACK_COLOR`.
pub fn display_color(color: Option<&str>) -> &str {
    color.unwrap_or(FALLBACK_COLOR)
}

/// Typed field on an object type's form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: AttributeId,
    pub object_type_id: ObjectTypeId,
    pub label: String,
    pub key: String,
    #[serde(rename = "type")]
    pub kind: AttributeKind,
    /// Stored and exchanged, not enforced.
    pub required: bool,
    pub order_index: i64,
}

/// One allowed answer of a select attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeOption {
    pub id: AttributeOptionId,
    pub attribute_id: AttributeId,
    pub value_text: String,
}

/// Read model: one attribute with its option catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeWithOptions {
    pub attribute: Attribute,
    pub options: Vec<AttributeOption>,
}

/// Read model: one object type with its ordered attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTypeTree {
    pub object_type: ObjectType,
    pub attributes: Vec<AttributeWithOptions>,
}
