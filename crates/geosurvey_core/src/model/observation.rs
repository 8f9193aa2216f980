//! Field-visit records: sessions, observations and recorded answers.
//!
//! # Invariants
//! - At most one `ObservationAnswer` per `(observation_id, attribute_id)`.
//! - `status` is stored metadata; no workflow is driven by it.

use super::project::ProjectId;
use super::schema::{AttributeId, ObjectTypeId};
use super::validation::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type SessionId = i64;
pub type ObservationId = i64;
pub type AnswerId = i64;

/// WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Lifecycle marker of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationStatus {
    Draft,
    Finalized,
    Deleted,
}

impl ObservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Finalized => "finalized",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "finalized" => Ok(Self::Finalized),
            "deleted" => Ok(Self::Deleted),
            _ => Err(ValidationError::UnknownStatus(value.to_string())),
        }
    }
}

/// One field visit grouping observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveySession {
    pub id: SessionId,
    pub project_id: ProjectId,
    pub started_at: i64,
    /// `None` while the session is still open.
    pub ended_at: Option<i64>,
}

/// Geolocated record of one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,
    pub session_id: SessionId,
    pub object_type_id: ObjectTypeId,
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: i64,
    pub notes: Option<String>,
    pub status: ObservationStatus,
    /// Controls whether the map renders a marker.
    pub map_visible: bool,
}

impl Observation {
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Write model for a new observation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
    pub session_id: SessionId,
    pub object_type_id: ObjectTypeId,
    pub location: GeoPoint,
    pub notes: Option<String>,
    /// Defaults to now when `None`.
    pub captured_at: Option<i64>,
}

/// Recorded answer for one attribute on one observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationAnswer {
    pub id: AnswerId,
    pub observation_id: ObservationId,
    pub attribute_id: AttributeId,
    pub value_text: Option<String>,
}

/// Answer joined with the attribute metadata needed for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledAnswer {
    pub attribute_id: AttributeId,
    pub label: String,
    pub key: String,
    pub value_text: Option<String>,
}

/// Observation flattened with its answers keyed by attribute key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationWithValues {
    pub observation: Observation,
    pub values: BTreeMap<String, Option<String>>,
}

#[cfg(test)]
mod tests {
    use super::ObservationStatus;

    #[test]
    fn status_parse_accepts_storage_names() {
        assert_eq!(ObservationStatus::parse("draft").unwrap(), ObservationStatus::Draft);
        assert_eq!(
            ObservationStatus::parse("FINALIZED").unwrap(),
            ObservationStatus::Finalized
        );
        assert!(ObservationStatus::parse("archived").is_err());
    }
}
