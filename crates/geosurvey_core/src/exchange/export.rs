//! Project → sectioned CSV.

use super::csv_text::render_section;
use super::ExchangeError;
use crate::live::{load_observation_feed, VisibilityFilter};
use crate::model::project::ProjectId;
use crate::repo::observation_repo::{ObservationRepository, SqliteObservationRepository};
use crate::repo::schema_repo::{SchemaRepository, SqliteSchemaRepository};
use crate::repo::{EntityRef, RepoError};
use log::{error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Instant;

static FILE_NAME_UNSAFE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9_-]+").expect("valid file name regex"));

pub(crate) const PROJECTS: &str = "PROJECTS";
pub(crate) const OBJECT_TYPES: &str = "OBJECT_TYPES";
pub(crate) const ATTRIBUTES: &str = "ATTRIBUTES";
pub(crate) const SURVEY_SESSIONS: &str = "SURVEY_SESSIONS";
pub(crate) const OBSERVATIONS: &str = "OBSERVATIONS";
pub(crate) const ATTRIBUTE_VALUES: &str = "ATTRIBUTE_VALUES";
pub(crate) const ATTRIBUTE_COORDINATE_VALUES: &str = "ATTRIBUTE_COORDINATE_VALUES";
pub(crate) const FLATTENED_OBSERVATIONS: &str = "FLATTENED_OBSERVATIONS";

const PROJECT_HEADERS: &[&str] = &["id", "name", "created_at"];
const OBJECT_TYPE_HEADERS: &[&str] = &["id", "project_id", "name", "color", "order_index"];
const ATTRIBUTE_HEADERS: &[&str] = &[
    "id",
    "object_type_id",
    "label",
    "key",
    "type",
    "required",
    "order_index",
];
const SESSION_HEADERS: &[&str] = &["id", "project_id", "started_at", "ended_at"];
const OBSERVATION_HEADERS: &[&str] = &[
    "id",
    "session_id",
    "object_type_id",
    "latitude",
    "longitude",
    "captured_at",
    "notes",
    "status",
    "map_visible",
];
const OPTION_HEADERS: &[&str] = &["id", "attribute_id", "value_text"];
const ANSWER_HEADERS: &[&str] = &["id", "observation_id", "attribute_id", "value_text"];
const FLATTENED_HEADERS: &[&str] = &[
    "observation_id",
    "object_type",
    "latitude",
    "longitude",
    "attribute_label",
    "attribute_value",
    "captured_at",
];

/// What an export contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Every table of the project, one section each.
    WholeProject,
    /// One flattened row per recorded answer.
    LocationsOnly,
}

impl ExportMode {
    /// File-name tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WholeProject => "whole",
            Self::LocationsOnly => "locations",
        }
    }

    pub(crate) fn share_title(self) -> &'static str {
        match self {
            Self::WholeProject => "Export Full Project Data",
            Self::LocationsOnly => "Export Locations Data",
        }
    }
}

/// Renders `project_id` as CSV text.
pub fn export_project(
    conn: &Connection,
    project_id: ProjectId,
    mode: ExportMode,
) -> Result<String, ExchangeError> {
    let started_at = Instant::now();
    let result = match mode {
        ExportMode::WholeProject => export_whole(conn, project_id),
        ExportMode::LocationsOnly => export_locations(conn, project_id),
    };
    let duration_ms = started_at.elapsed().as_millis();
    match &result {
        Ok(text) => info!(
            "event=csv_export module=exchange status=ok project_id={project_id} mode={} bytes={} duration_ms={duration_ms}",
            mode.as_str(),
            text.len()
        ),
        Err(_) => error!(
            "event=csv_export module=exchange status=error project_id={project_id} mode={} duration_ms={duration_ms} error_code=csv_export_failed",
            mode.as_str()
        ),
    }
    result
}

fn export_whole(conn: &Connection, project_id: ProjectId) -> Result<String, ExchangeError> {
    let schema = SqliteSchemaRepository::new(conn);
    let survey = SqliteObservationRepository::new(conn);
    let project = schema
        .get_project(project_id)?
        .ok_or(RepoError::NotFound(EntityRef::Project(project_id)))?;

    let projects = vec![vec![
        json!(project.id),
        json!(project.name),
        json!(project.created_at),
    ]];
    let object_types = schema
        .list_object_types(project_id)?
        .into_iter()
        .map(|row| {
            vec![
                json!(row.id),
                json!(row.project_id),
                json!(row.name),
                json!(row.color),
                json!(row.order_index),
            ]
        })
        .collect::<Vec<_>>();
    let attributes = schema
        .list_project_attributes(project_id)?
        .into_iter()
        .map(|row| {
            vec![
                json!(row.id),
                json!(row.object_type_id),
                json!(row.label),
                json!(row.key),
                json!(row.kind.as_str()),
                json!(row.required),
                json!(row.order_index),
            ]
        })
        .collect::<Vec<_>>();
    let sessions = survey
        .list_sessions(project_id)?
        .into_iter()
        .map(|row| {
            vec![
                json!(row.id),
                json!(row.project_id),
                json!(row.started_at),
                json!(row.ended_at),
            ]
        })
        .collect::<Vec<_>>();
    let observations = survey
        .list_project_observations(project_id)?
        .into_iter()
        .map(|row| {
            vec![
                json!(row.id),
                json!(row.session_id),
                json!(row.object_type_id),
                json!(row.latitude),
                json!(row.longitude),
                json!(row.captured_at),
                json!(row.notes),
                json!(row.status.as_str()),
                json!(row.map_visible),
            ]
        })
        .collect::<Vec<_>>();
    let options = schema
        .list_project_options(project_id)?
        .into_iter()
        .map(|row| vec![json!(row.id), json!(row.attribute_id), json!(row.value_text)])
        .collect::<Vec<_>>();
    let answers = survey
        .list_project_answers(project_id)?
        .into_iter()
        .map(|row| {
            vec![
                json!(row.id),
                json!(row.observation_id),
                json!(row.attribute_id),
                json!(row.value_text),
            ]
        })
        .collect::<Vec<_>>();

    let mut out = String::new();
    out.push_str(&render_section(PROJECTS, PROJECT_HEADERS, &projects));
    out.push_str(&render_section(OBJECT_TYPES, OBJECT_TYPE_HEADERS, &object_types));
    out.push_str(&render_section(ATTRIBUTES, ATTRIBUTE_HEADERS, &attributes));
    out.push_str(&render_section(SURVEY_SESSIONS, SESSION_HEADERS, &sessions));
    out.push_str(&render_section(OBSERVATIONS, OBSERVATION_HEADERS, &observations));
    out.push_str(&render_section(ATTRIBUTE_VALUES, OPTION_HEADERS, &options));
    out.push_str(&render_section(
        ATTRIBUTE_COORDINATE_VALUES,
        ANSWER_HEADERS,
        &answers,
    ));
    Ok(out)
}

fn export_locations(conn: &Connection, project_id: ProjectId) -> Result<String, ExchangeError> {
    let schema = SqliteSchemaRepository::new(conn);
    if schema.get_project(project_id)?.is_none() {
        return Err(RepoError::NotFound(EntityRef::Project(project_id)).into());
    }

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for item in load_observation_feed(conn, project_id, VisibilityFilter::All)? {
        let observation = &item.observation;
        let prefix = [
            json!(observation.id),
            json!(item.object_type_name),
            json!(observation.latitude),
            json!(observation.longitude),
        ];
        if item.answers.is_empty() {
            let mut row = prefix.to_vec();
            row.extend([json!(""), json!(""), json!(observation.captured_at)]);
            rows.push(row);
            continue;
        }
        for answer in &item.answers {
            let mut row = prefix.to_vec();
            row.extend([
                json!(answer.label),
                json!(answer.value_text.as_deref().unwrap_or("")),
                json!(observation.captured_at),
            ]);
            rows.push(row);
        }
    }
    Ok(render_section(FLATTENED_OBSERVATIONS, FLATTENED_HEADERS, &rows))
}

/// `<slug>_<mode>_export.csv`; the slug is the lowercased name with every
/// run outside `[a-z0-9_-]` collapsed to `_`, or `export` when nothing is left.
pub fn export_file_name(project_name: &str, mode: ExportMode) -> String {
    let lowered = project_name.trim().to_lowercase();
    let slug = FILE_NAME_UNSAFE_RE.replace_all(&lowered, "_");
    let slug = match slug.trim_matches('_') {
        "" => "export",
        trimmed => trimmed,
    };
    format!("{slug}_{}_export.csv", mode.as_str())
}

/// Writes UTF-8 `text` to `dir/file_name`, creating `dir` when missing.
pub fn write_export(dir: &Path, file_name: &str, text: &str) -> Result<PathBuf, ExchangeError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    std::fs::write(&path, text.as_bytes())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::{export_file_name, ExportMode};

    #[test]
    fn file_name_slugs_whitespace_and_case() {
        assert_eq!(
            export_file_name("My  Field Trip", ExportMode::WholeProject),
            "my_field_trip_whole_export.csv"
        );
        assert_eq!(
            export_file_name("Demo", ExportMode::LocationsOnly),
            "demo_locations_export.csv"
        );
    }

    #[test]
    fn file_name_never_contains_path_separators() {
        assert_eq!(
            export_file_name("Trip 2024/25", ExportMode::WholeProject),
            "trip_2024_25_whole_export.csv"
        );
        assert_eq!(
            export_file_name("../x", ExportMode::LocationsOnly),
            "x_locations_export.csv"
        );
        assert_eq!(
            export_file_name(" ?? ", ExportMode::WholeProject),
            "export_whole_export.csv"
        );
        assert_eq!(
            export_file_name("Bird-watch", ExportMode::WholeProject),
            "bird-watch_whole_export.csv"
        );
    }
}
