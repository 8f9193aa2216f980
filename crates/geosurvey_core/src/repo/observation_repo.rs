//! Survey session, observation and answer persistence.
//!
//! # Responsibility
//! - Record geolocated observations grouped into survey sessions.
//! - Keep exactly one answer row per `(observation, attribute)` pair.
//!
//! # Invariants
//! - `upsert_answer` is last-write-wins on the pair.
//! - Observation listing is newest first (`captured_at DESC, id DESC`).

use super::{bool_to_int, ensure_connection_ready, int_to_bool, EntityRef, RepoError, RepoResult};
use crate::model::now_epoch_ms;
use crate::model::observation::{
    AnswerId, LabeledAnswer, NewObservation, Observation, ObservationAnswer, ObservationId,
    ObservationStatus, ObservationWithValues, SessionId, SurveySession,
};
use crate::model::project::ProjectId;
use crate::model::schema::{AttributeId, ObjectTypeId};
use crate::model::validation::validate_coordinate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

const OBSERVATION_SELECT_SQL: &str = "SELECT
    id,
    session_id,
    object_type_id,
    latitude,
    longitude,
    captured_at,
    notes,
    status,
    map_visible
FROM observations";

/// Repository interface for field-visit records.
pub trait ObservationRepository {
    fn start_session(&self, project_id: ProjectId) -> RepoResult<SessionId>;
    /// Inserts a session with explicit timestamps (import path).
    fn insert_session(
        &self,
        project_id: ProjectId,
        started_at: i64,
        ended_at: Option<i64>,
    ) -> RepoResult<SessionId>;
    fn end_session(&self, id: SessionId) -> RepoResult<()>;
    /// Newest first.
    fn list_sessions(&self, project_id: ProjectId) -> RepoResult<Vec<SurveySession>>;
    /// Most recently started session of the project that has not ended.
    fn latest_open_session(&self, project_id: ProjectId) -> RepoResult<Option<SurveySession>>;

    fn create_observation(&self, observation: &NewObservation) -> RepoResult<ObservationId>;
    /// Inserts a fully specified observation (import path); `id` is ignored.
    fn insert_observation(&self, observation: &Observation) -> RepoResult<ObservationId>;
    fn get_observation(&self, id: ObservationId) -> RepoResult<Option<Observation>>;
    fn list_observations(
        &self,
        session_id: SessionId,
        object_type_id: Option<ObjectTypeId>,
    ) -> RepoResult<Vec<Observation>>;
    /// Observations of every session of one project.
    fn list_project_observations(&self, project_id: ProjectId) -> RepoResult<Vec<Observation>>;
    fn update_observation_notes(&self, id: ObservationId, notes: Option<&str>) -> RepoResult<()>;
    fn set_observation_status(&self, id: ObservationId, status: ObservationStatus)
        -> RepoResult<()>;
    fn set_map_visible(&self, id: ObservationId, visible: bool) -> RepoResult<()>;
    fn delete_observation(&self, id: ObservationId) -> RepoResult<()>;

    fn upsert_answer(
        &self,
        observation_id: ObservationId,
        attribute_id: AttributeId,
        value_text: Option<&str>,
    ) -> RepoResult<AnswerId>;
    /// Answers joined with attribute label/key, in attribute display order.
    fn list_answers(&self, observation_id: ObservationId) -> RepoResult<Vec<LabeledAnswer>>;
    /// Raw answer rows of every observation of one project.
    fn list_project_answers(&self, project_id: ProjectId) -> RepoResult<Vec<ObservationAnswer>>;
    fn get_observation_with_values(
        &self,
        id: ObservationId,
    ) -> RepoResult<Option<ObservationWithValues>>;
}

/// SQLite-backed observation repository.
pub struct SqliteObservationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteObservationRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }

    pub(crate) fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn expect_changed(&self, changed: usize, entity: EntityRef) -> RepoResult<()> {
        if changed == 0 {
            return Err(RepoError::NotFound(entity));
        }
        Ok(())
    }
}

impl ObservationRepository for SqliteObservationRepository<'_> {
    fn start_session(&self, project_id: ProjectId) -> RepoResult<SessionId> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM projects WHERE id = ?1);",
            [project_id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(RepoError::NotFound(EntityRef::Project(project_id)));
        }
        self.conn.execute(
            "INSERT INTO survey_sessions (project_id, started_at) VALUES (?1, ?2);",
            params![project_id, now_epoch_ms()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_session(
        &self,
        project_id: ProjectId,
        started_at: i64,
        ended_at: Option<i64>,
    ) -> RepoResult<SessionId> {
        self.conn.execute(
            "INSERT INTO survey_sessions (project_id, started_at, ended_at) VALUES (?1, ?2, ?3);",
            params![project_id, started_at, ended_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn end_session(&self, id: SessionId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE survey_sessions SET ended_at = ?2 WHERE id = ?1;",
            params![id, now_epoch_ms()],
        )?;
        self.expect_changed(changed, EntityRef::Session(id))
    }

    fn list_sessions(&self, project_id: ProjectId) -> RepoResult<Vec<SurveySession>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, started_at, ended_at
             FROM survey_sessions
             WHERE project_id = ?1
             ORDER BY started_at DESC, id DESC;",
        )?;
        let sessions = stmt
            .query_map([project_id], parse_session_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    fn latest_open_session(&self, project_id: ProjectId) -> RepoResult<Option<SurveySession>> {
        let session = self
            .conn
            .query_row(
                "SELECT id, project_id, started_at, ended_at
                 FROM survey_sessions
                 WHERE project_id = ?1
                   AND ended_at IS NULL
                 ORDER BY started_at DESC, id DESC
                 LIMIT 1;",
                [project_id],
                parse_session_row,
            )
            .optional()?;
        Ok(session)
    }

    fn create_observation(&self, observation: &NewObservation) -> RepoResult<ObservationId> {
        let location = observation.location;
        validate_coordinate(location.latitude, location.longitude)?;
        let notes = normalize_notes(observation.notes.as_deref());
        self.conn.execute(
            "INSERT INTO observations (
                session_id,
                object_type_id,
                latitude,
                longitude,
                captured_at,
                notes,
                status,
                map_visible
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'draft', 1);",
            params![
                observation.session_id,
                observation.object_type_id,
                location.latitude,
                location.longitude,
                observation.captured_at.unwrap_or_else(now_epoch_ms),
                notes,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_observation(&self, observation: &Observation) -> RepoResult<ObservationId> {
        validate_coordinate(observation.latitude, observation.longitude)?;
        self.conn.execute(
            "INSERT INTO observations (
                session_id,
                object_type_id,
                latitude,
                longitude,
                captured_at,
                notes,
                status,
                map_visible
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                observation.session_id,
                observation.object_type_id,
                observation.latitude,
                observation.longitude,
                observation.captured_at,
                normalize_notes(observation.notes.as_deref()),
                observation.status.as_str(),
                bool_to_int(observation.map_visible),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_observation(&self, id: ObservationId) -> RepoResult<Option<Observation>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{OBSERVATION_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_observation_row(row)?));
        }
        Ok(None)
    }

    fn list_observations(
        &self,
        session_id: SessionId,
        object_type_id: Option<ObjectTypeId>,
    ) -> RepoResult<Vec<Observation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{OBSERVATION_SELECT_SQL}
             WHERE session_id = ?1
               AND (?2 IS NULL OR object_type_id = ?2)
             ORDER BY captured_at DESC, id DESC;"
        ))?;
        let mut rows = stmt.query(params![session_id, object_type_id])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_observation_row(row)?);
        }
        Ok(items)
    }

    fn list_project_observations(&self, project_id: ProjectId) -> RepoResult<Vec<Observation>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                o.id AS id,
                o.session_id AS session_id,
                o.object_type_id AS object_type_id,
                o.latitude AS latitude,
                o.longitude AS longitude,
                o.captured_at AS captured_at,
                o.notes AS notes,
                o.status AS status,
                o.map_visible AS map_visible
             FROM observations o
             INNER JOIN survey_sessions s ON s.id = o.session_id
             WHERE s.project_id = ?1
             ORDER BY o.captured_at DESC, o.id DESC;",
        )?;
        let mut rows = stmt.query([project_id])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_observation_row(row)?);
        }
        Ok(items)
    }

    fn update_observation_notes(&self, id: ObservationId, notes: Option<&str>) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE observations SET notes = ?2 WHERE id = ?1;",
            params![id, normalize_notes(notes)],
        )?;
        self.expect_changed(changed, EntityRef::Observation(id))
    }

    fn set_observation_status(
        &self,
        id: ObservationId,
        status: ObservationStatus,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE observations SET status = ?2 WHERE id = ?1;",
            params![id, status.as_str()],
        )?;
        self.expect_changed(changed, EntityRef::Observation(id))
    }

    fn set_map_visible(&self, id: ObservationId, visible: bool) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE observations SET map_visible = ?2 WHERE id = ?1;",
            params![id, bool_to_int(visible)],
        )?;
        self.expect_changed(changed, EntityRef::Observation(id))
    }

    fn delete_observation(&self, id: ObservationId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM observations WHERE id = ?1;", [id])?;
        self.expect_changed(changed, EntityRef::Observation(id))
    }

    fn upsert_answer(
        &self,
        observation_id: ObservationId,
        attribute_id: AttributeId,
        value_text: Option<&str>,
    ) -> RepoResult<AnswerId> {
        let id = self.conn.query_row(
            "INSERT INTO attribute_coordinate_values (observation_id, attribute_id, value_text)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (observation_id, attribute_id)
             DO UPDATE SET value_text = excluded.value_text
             RETURNING id;",
            params![observation_id, attribute_id, value_text],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn list_answers(&self, observation_id: ObservationId) -> RepoResult<Vec<LabeledAnswer>> {
        let mut stmt = self.conn.prepare(
            "SELECT v.attribute_id, a.label, a.key, v.value_text
             FROM attribute_coordinate_values v
             INNER JOIN attributes a ON a.id = v.attribute_id
             WHERE v.observation_id = ?1
             ORDER BY a.order_index ASC, a.id ASC;",
        )?;
        let answers = stmt
            .query_map([observation_id], |row| {
                Ok(LabeledAnswer {
                    attribute_id: row.get(0)?,
                    label: row.get(1)?,
                    key: row.get(2)?,
                    value_text: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(answers)
    }

    fn list_project_answers(&self, project_id: ProjectId) -> RepoResult<Vec<ObservationAnswer>> {
        let mut stmt = self.conn.prepare(
            "SELECT v.id, v.observation_id, v.attribute_id, v.value_text
             FROM attribute_coordinate_values v
             INNER JOIN observations o ON o.id = v.observation_id
             INNER JOIN survey_sessions s ON s.id = o.session_id
             WHERE s.project_id = ?1
             ORDER BY v.observation_id ASC, v.id ASC;",
        )?;
        let answers = stmt
            .query_map([project_id], |row| {
                Ok(ObservationAnswer {
                    id: row.get(0)?,
                    observation_id: row.get(1)?,
                    attribute_id: row.get(2)?,
                    value_text: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(answers)
    }

    fn get_observation_with_values(
        &self,
        id: ObservationId,
    ) -> RepoResult<Option<ObservationWithValues>> {
        let Some(observation) = self.get_observation(id)? else {
            return Ok(None);
        };
        let values = self
            .list_answers(id)?
            .into_iter()
            .map(|answer| (answer.key, answer.value_text))
            .collect::<BTreeMap<_, _>>();
        Ok(Some(ObservationWithValues {
            observation,
            values,
        }))
    }
}

fn normalize_notes(notes: Option<&str>) -> Option<&str> {
    notes.map(str::trim).filter(|notes| !notes.is_empty())
}

fn parse_session_row(row: &Row<'_>) -> rusqlite::Result<SurveySession> {
    Ok(SurveySession {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
    })
}

pub(crate) fn parse_observation_row(row: &Row<'_>) -> RepoResult<Observation> {
    let status_text: String = row.get("status")?;
    let status = ObservationStatus::parse(&status_text).map_err(|_| {
        RepoError::InvalidData(format!(
            "invalid observation status `{status_text}` in observations.status"
        ))
    })?;
    Ok(Observation {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        object_type_id: row.get("object_type_id")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        captured_at: row.get("captured_at")?,
        notes: row.get("notes")?,
        status,
        map_visible: int_to_bool(row.get("map_visible")?, "observations.map_visible")?,
    })
}
