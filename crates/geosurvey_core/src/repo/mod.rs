//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Every read is scoped by an explicit parent id; no global scans are
//!   post-filtered in memory.
//! - Repository APIs return semantic errors (`NotFound`) in addition to DB
//!   transport errors.

pub mod observation_repo;
pub mod schema_repo;

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::observation::{ObservationId, SessionId};
use crate::model::project::ProjectId;
use crate::model::schema::{AttributeId, AttributeOptionId, ObjectTypeId};
use crate::model::validation::ValidationError;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Typed reference to one persisted row, used by `RepoError::NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Project(ProjectId),
    ObjectType(ObjectTypeId),
    Attribute(AttributeId),
    AttributeOption(AttributeOptionId),
    Session(SessionId),
    Observation(ObservationId),
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Project(id) => write!(f, "project {id}"),
            Self::ObjectType(id) => write!(f, "object type {id}"),
            Self::Attribute(id) => write!(f, "attribute {id}"),
            Self::AttributeOption(id) => write!(f, "attribute option {id}"),
            Self::Session(id) => write!(f, "survey session {id}"),
            Self::Observation(id) => write!(f, "observation {id}"),
        }
    }
}

/// Repository error for survey persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Db(DbError),
    NotFound(EntityRef),
    InvalidData(String),
    /// Connection schema is not at the version this binary expects.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
}

/// Message shown for FK/unique violations instead of the SQLite text.
pub const INTEGRITY_MESSAGE: &str = "the change conflicts with existing survey data";

impl RepoError {
    /// Returns whether the underlying failure is an FK/unique violation.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::Db(err) if err.is_constraint_violation())
    }

    /// Text for UI callers: integrity violations collapse to a generic
    /// message, everything else keeps its `Display` text.
    pub fn user_message(&self) -> String {
        if self.is_integrity_violation() {
            INTEGRITY_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(entity) => write!(f, "{entity} not found"),
            Self::InvalidData(message) => write!(f, "invalid persisted survey data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "survey repository requires schema version {expected_version}, got {actual_version}"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) => None,
            Self::InvalidData(_) => None,
            Self::UninitializedConnection { .. } => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Rejects connections that did not go through `db::open_db*`.
pub(crate) fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn int_to_bool(value: i64, column: &'static str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}
