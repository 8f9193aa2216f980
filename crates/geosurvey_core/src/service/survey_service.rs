//! Observation capture use-cases.
//!
//! # Responsibility
//! - Record one geolocated observation with its answers in one transaction.
//! - Validate answers against the object type's form.
//! - Resolve the capture position through a `LocationProvider`.
//!
//! # Invariants
//! - Observations are always attached to a session of the same project as
//!   their object type.
//! - Boolean answers are stored as `True`/`False`; select answers are one of
//!   the attribute's options.

use crate::live::{ChangeBus, DataTable};
use crate::model::observation::{
    GeoPoint, NewObservation, ObservationId, ObservationStatus, SessionId,
};
use crate::model::project::ProjectId;
use crate::model::schema::{AttributeId, AttributeKind, ObjectTypeId};
use crate::repo::observation_repo::{ObservationRepository, SqliteObservationRepository};
use crate::repo::schema_repo::{SchemaRepository, SqliteSchemaRepository};
use crate::repo::{ensure_connection_ready, EntityRef, RepoError};
use log::{info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Map center used when no device position is available (Enschede).
pub const DEFAULT_LOCATION: GeoPoint = GeoPoint {
    latitude: 52.2215,
    longitude: 6.8937,
};

/// Why a device position could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    PermissionDenied,
    Unavailable(String),
}

impl Display for LocationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "location permission denied"),
            Self::Unavailable(reason) => write!(f, "location unavailable: {reason}"),
        }
    }
}

impl Error for LocationError {}

/// Source of the current device position.
pub trait LocationProvider {
    fn current_location(&self) -> Result<GeoPoint, LocationError>;
}

/// Asks `provider` for a position, falling back to `fallback` on failure.
pub fn resolve_location(provider: &dyn LocationProvider, fallback: GeoPoint) -> GeoPoint {
    match provider.current_location() {
        Ok(point) => point,
        Err(err) => {
            let reason = match err {
                LocationError::PermissionDenied => "permission_denied",
                LocationError::Unavailable(_) => "unavailable",
            };
            warn!("event=location_resolve module=survey status=fallback reason={reason}");
            fallback
        }
    }
}

/// One answer typed into the observation form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerInput {
    pub attribute_id: AttributeId,
    #[serde(default)]
    pub value: Option<String>,
}

impl AnswerInput {
    pub fn new(attribute_id: AttributeId, value: impl Into<String>) -> Self {
        Self {
            attribute_id,
            value: Some(value.into()),
        }
    }
}

/// Ids produced by `save_observation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SavedObservation {
    pub session_id: SessionId,
    pub observation_id: ObservationId,
    pub answers_written: usize,
}

#[derive(Debug)]
pub enum SurveyError {
    ProjectNotFound(ProjectId),
    ObjectTypeNotFound(ObjectTypeId),
    ObservationNotFound(ObservationId),
    SessionNotFound(SessionId),
    /// Object type belongs to another project.
    ObjectTypeOutsideProject {
        object_type_id: ObjectTypeId,
        project_id: ProjectId,
    },
    /// Attribute is not part of the observed object type's form.
    AttributeOutsideObjectType {
        attribute_id: AttributeId,
        object_type_id: ObjectTypeId,
    },
    /// Answer is not allowed for a boolean or select attribute.
    InvalidAnswer { attribute_id: AttributeId },
    Repo(RepoError),
}

impl Display for SurveyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProjectNotFound(id) => write!(f, "project {id} not found"),
            Self::ObjectTypeNotFound(id) => write!(f, "object type {id} not found"),
            Self::ObservationNotFound(id) => write!(f, "observation {id} not found"),
            Self::SessionNotFound(id) => write!(f, "survey session {id} not found"),
            Self::ObjectTypeOutsideProject {
                object_type_id,
                project_id,
            } => write!(
                f,
                "object type {object_type_id} does not belong to project {project_id}"
            ),
            Self::AttributeOutsideObjectType {
                attribute_id,
                object_type_id,
            } => write!(
                f,
                "attribute {attribute_id} does not belong to object type {object_type_id}"
            ),
            Self::InvalidAnswer { attribute_id } => {
                write!(f, "answer not allowed for attribute {attribute_id}")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SurveyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for SurveyError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(EntityRef::Project(id)) => Self::ProjectNotFound(id),
            RepoError::NotFound(EntityRef::ObjectType(id)) => Self::ObjectTypeNotFound(id),
            RepoError::NotFound(EntityRef::Observation(id)) => Self::ObservationNotFound(id),
            RepoError::NotFound(EntityRef::Session(id)) => Self::SessionNotFound(id),
            other => Self::Repo(other),
        }
    }
}

impl From<rusqlite::Error> for SurveyError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

/// Field-visit facade.
pub struct SurveyService<'conn> {
    conn: &'conn Connection,
    bus: Arc<ChangeBus>,
}

impl<'conn> SurveyService<'conn> {
    pub fn try_new(conn: &'conn Connection, bus: Arc<ChangeBus>) -> Result<Self, SurveyError> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn, bus })
    }

    /// Records one observation of `object_type_id` at `location`.
    ///
    /// Reuses the project's latest open session or starts one. Blank answers
    /// are skipped.
    pub fn save_observation(
        &self,
        project_id: ProjectId,
        object_type_id: ObjectTypeId,
        location: GeoPoint,
        answers: &[AnswerInput],
    ) -> Result<SavedObservation, SurveyError> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let schema = SqliteSchemaRepository::new(&tx);
        let observations = SqliteObservationRepository::new(&tx);

        if schema.get_project(project_id)?.is_none() {
            return Err(SurveyError::ProjectNotFound(project_id));
        }
        let object_type = schema
            .get_object_type(object_type_id)?
            .ok_or(SurveyError::ObjectTypeNotFound(object_type_id))?;
        if object_type.project_id != project_id {
            return Err(SurveyError::ObjectTypeOutsideProject {
                object_type_id,
                project_id,
            });
        }

        let mut validated = Vec::with_capacity(answers.len());
        for answer in answers {
            let Some(value) = answer
                .value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
            else {
                continue;
            };
            let value = validate_answer(&schema, object_type_id, answer.attribute_id, value)?;
            validated.push((answer.attribute_id, value));
        }

        let session_id = match observations.latest_open_session(project_id)? {
            Some(session) => session.id,
            None => observations.start_session(project_id)?,
        };
        let observation_id = observations.create_observation(&NewObservation {
            session_id,
            object_type_id,
            location,
            notes: None,
            captured_at: None,
        })?;
        for (attribute_id, value) in &validated {
            observations.upsert_answer(observation_id, *attribute_id, Some(value))?;
        }
        tx.commit()?;

        info!(
            "event=observation_save module=survey status=ok project_id={project_id} observation_id={observation_id} answers={}",
            validated.len()
        );
        self.bus.publish(&DataTable::SURVEY);
        Ok(SavedObservation {
            session_id,
            observation_id,
            answers_written: validated.len(),
        })
    }

    /// Changes one answer of an existing observation; blank clears it.
    pub fn set_answer(
        &self,
        observation_id: ObservationId,
        attribute_id: AttributeId,
        value: Option<&str>,
    ) -> Result<(), SurveyError> {
        let schema = SqliteSchemaRepository::new(self.conn);
        let observations = SqliteObservationRepository::new(self.conn);
        let observation = observations
            .get_observation(observation_id)?
            .ok_or(SurveyError::ObservationNotFound(observation_id))?;
        let value = match value.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => Some(validate_answer(
                &schema,
                observation.object_type_id,
                attribute_id,
                value,
            )?),
            None => None,
        };
        observations.upsert_answer(observation_id, attribute_id, value.as_deref())?;
        self.bus.publish(&[DataTable::ObservationAnswers]);
        Ok(())
    }

    pub fn update_notes(
        &self,
        observation_id: ObservationId,
        notes: Option<&str>,
    ) -> Result<(), SurveyError> {
        SqliteObservationRepository::new(self.conn).update_observation_notes(observation_id, notes)?;
        self.bus.publish(&[DataTable::Observations]);
        Ok(())
    }

    pub fn set_status(
        &self,
        observation_id: ObservationId,
        status: ObservationStatus,
    ) -> Result<(), SurveyError> {
        SqliteObservationRepository::new(self.conn).set_observation_status(observation_id, status)?;
        self.bus.publish(&[DataTable::Observations]);
        Ok(())
    }

    /// Shows or hides the observation's map marker.
    pub fn set_map_visible(
        &self,
        observation_id: ObservationId,
        visible: bool,
    ) -> Result<(), SurveyError> {
        SqliteObservationRepository::new(self.conn).set_map_visible(observation_id, visible)?;
        self.bus.publish(&[DataTable::Observations]);
        Ok(())
    }

    pub fn delete_observation(&self, observation_id: ObservationId) -> Result<(), SurveyError> {
        SqliteObservationRepository::new(self.conn).delete_observation(observation_id)?;
        self.bus
            .publish(&[DataTable::Observations, DataTable::ObservationAnswers]);
        Ok(())
    }

    /// Closes a session; the next save starts a fresh one.
    pub fn end_session(&self, session_id: SessionId) -> Result<(), SurveyError> {
        SqliteObservationRepository::new(self.conn).end_session(session_id)?;
        self.bus.publish(&[DataTable::SurveySessions]);
        Ok(())
    }
}

/// Checks one non-blank answer against its attribute and returns the value
/// to store.
fn validate_answer(
    schema: &SqliteSchemaRepository<'_>,
    object_type_id: ObjectTypeId,
    attribute_id: AttributeId,
    value: &str,
) -> Result<String, SurveyError> {
    let attribute = schema
        .get_attribute(attribute_id)?
        .filter(|attribute| attribute.object_type_id == object_type_id)
        .ok_or(SurveyError::AttributeOutsideObjectType {
            attribute_id,
            object_type_id,
        })?;

    if let Some(allowed) = attribute.kind.allowed_answers() {
        return allowed
            .iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(value))
            .map(|candidate| candidate.to_string())
            .ok_or(SurveyError::InvalidAnswer { attribute_id });
    }
    if attribute.kind == AttributeKind::Select {
        let options = schema.list_options(attribute_id)?;
        if !options.iter().any(|option| option.value_text == value) {
            return Err(SurveyError::InvalidAnswer { attribute_id });
        }
    }
    Ok(value.to_string())
}
