//! Sectioned CSV → new project.
//!
//! # Responsibility
//! - Recreate an exported project under fresh ids.
//!
//! # Invariants
//! - Parents are inserted before children; child rows are re-pointed through
//!   old → new id maps.
//! - Rows whose parent was not imported, or whose required fields do not
//!   parse, are dropped and counted; they never abort the import.
//! - The whole import commits in one transaction.

use super::csv_text::{split_sections, Record, Section};
use super::export::{
    ATTRIBUTES, ATTRIBUTE_COORDINATE_VALUES, ATTRIBUTE_VALUES, OBJECT_TYPES, OBSERVATIONS,
    PROJECTS, SURVEY_SESSIONS,
};
use super::ExchangeError;
use crate::live::{ChangeBus, DataTable};
use crate::model::now_epoch_ms;
use crate::model::observation::{Observation, ObservationStatus};
use crate::model::project::ProjectId;
use crate::model::schema::{Attribute, AttributeKind};
use crate::model::validation::{derive_key, normalize_color};
use crate::repo::observation_repo::{ObservationRepository, SqliteObservationRepository};
use crate::repo::schema_repo::{SchemaRepository, SqliteSchemaRepository};
use crate::repo::{ensure_connection_ready, RepoError, RepoResult};
use log::{error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

/// Outcome of one import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub project_id: ProjectId,
    pub project_name: String,
    pub object_types: usize,
    pub attributes: usize,
    pub options: usize,
    pub sessions: usize,
    pub observations: usize,
    pub answers: usize,
    /// Rows skipped for a missing parent or unparsable required field.
    pub dropped_rows: usize,
    /// Sections skipped because a line could not be tokenized.
    pub skipped_sections: usize,
}

/// Imports `text` as a new project and publishes the change.
pub fn import_project(
    conn: &Connection,
    text: &str,
    bus: &ChangeBus,
) -> Result<ImportReport, ExchangeError> {
    let started_at = Instant::now();
    ensure_connection_ready(conn)?;
    let result = import_in_transaction(conn, text);
    let duration_ms = started_at.elapsed().as_millis();
    match &result {
        Ok(report) => {
            info!(
                "event=csv_import module=exchange status=ok project_id={} object_types={} attributes={} options={} sessions={} observations={} answers={} dropped_rows={} skipped_sections={} duration_ms={duration_ms}",
                report.project_id,
                report.object_types,
                report.attributes,
                report.options,
                report.sessions,
                report.observations,
                report.answers,
                report.dropped_rows,
                report.skipped_sections
            );
            bus.publish(&DataTable::ALL);
        }
        Err(_) => error!(
            "event=csv_import module=exchange status=error duration_ms={duration_ms} error_code=csv_import_failed"
        ),
    }
    result
}

fn import_in_transaction(conn: &Connection, text: &str) -> Result<ImportReport, ExchangeError> {
    let mut report = ImportReport::default();
    let mut sections: HashMap<String, Section> = HashMap::new();
    for raw in split_sections(text) {
        match Section::parse(&raw) {
            Ok(section) => {
                sections.insert(section.title.clone(), section);
            }
            Err(err) => {
                warn!(
                    "event=csv_import module=exchange status=skip_section column={} reason={}",
                    err.column, err.reason
                );
                report.skipped_sections += 1;
            }
        }
    }
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let schema = SqliteSchemaRepository::new(&tx);
    let survey = SqliteObservationRepository::new(&tx);

    let project_name = records(&sections, PROJECTS)
        .first()
        .and_then(|record| record.text("name"))
        .map(str::to_string)
        .unwrap_or_else(|| format!("Imported_{}", now_epoch_ms()));
    let project_id = schema.create_project(&project_name)?;
    report.project_id = project_id;
    report.project_name = project_name;

    let mut object_type_ids = HashMap::new();
    for (position, record) in records(&sections, OBJECT_TYPES).iter().enumerate() {
        let (Some(old_id), Some(name)) = (record.int("id"), record.text("name")) else {
            report.dropped_rows += 1;
            continue;
        };
        let color = normalize_color(record.text("color")).unwrap_or(None);
        let order_index = record.int("order_index").unwrap_or(position as i64);
        let inserted =
            schema.insert_object_type_at(project_id, name, color.as_deref(), order_index);
        if let Some(new_id) = keep_row(inserted, &mut report.dropped_rows)? {
            object_type_ids.insert(old_id, new_id);
            report.object_types += 1;
        }
    }

    let mut attribute_ids = HashMap::new();
    for (position, record) in records(&sections, ATTRIBUTES).iter().enumerate() {
        let parsed = parse_attribute(record, position, &object_type_ids);
        let Some((old_id, attribute)) = parsed else {
            report.dropped_rows += 1;
            continue;
        };
        let inserted = schema.insert_attribute(&attribute);
        if let Some(new_id) = keep_row(inserted, &mut report.dropped_rows)? {
            attribute_ids.insert(old_id, new_id);
            report.attributes += 1;
        }
    }

    for record in records(&sections, ATTRIBUTE_VALUES) {
        let parent = record
            .int("attribute_id")
            .and_then(|id| attribute_ids.get(&id));
        let (Some(attribute_id), Some(value_text)) = (parent, record.text("value_text")) else {
            report.dropped_rows += 1;
            continue;
        };
        let inserted = schema.add_option(*attribute_id, value_text);
        if keep_row(inserted, &mut report.dropped_rows)?.is_some() {
            report.options += 1;
        }
    }

    let mut session_ids = HashMap::new();
    for record in records(&sections, SURVEY_SESSIONS) {
        let Some(old_id) = record.int("id") else {
            report.dropped_rows += 1;
            continue;
        };
        let started_at = record.int("started_at").unwrap_or_else(now_epoch_ms);
        let new_id = survey.insert_session(project_id, started_at, record.int("ended_at"))?;
        session_ids.insert(old_id, new_id);
        report.sessions += 1;
    }

    let mut observation_ids = HashMap::new();
    for record in records(&sections, OBSERVATIONS) {
        let parsed = parse_observation(&record, &session_ids, &object_type_ids);
        let Some((old_id, observation)) = parsed else {
            report.dropped_rows += 1;
            continue;
        };
        let inserted = survey.insert_observation(&observation);
        if let Some(new_id) = keep_row(inserted, &mut report.dropped_rows)? {
            observation_ids.insert(old_id, new_id);
            report.observations += 1;
        }
    }

    for record in records(&sections, ATTRIBUTE_COORDINATE_VALUES) {
        let observation_id = record
            .int("observation_id")
            .and_then(|id| observation_ids.get(&id));
        let attribute_id = record
            .int("attribute_id")
            .and_then(|id| attribute_ids.get(&id));
        let (Some(observation_id), Some(attribute_id)) = (observation_id, attribute_id) else {
            report.dropped_rows += 1;
            continue;
        };
        survey.upsert_answer(*observation_id, *attribute_id, record.text("value_text"))?;
        report.answers += 1;
    }

    tx.commit()?;
    Ok(report)
}

fn records<'s>(sections: &'s HashMap<String, Section>, title: &str) -> Vec<Record<'s>> {
    sections
        .get(title)
        .map(|section| section.records().collect())
        .unwrap_or_default()
}

/// Turns a row-level validation failure into a dropped row; anything else
/// aborts the import.
fn keep_row<T>(result: RepoResult<T>, dropped: &mut usize) -> RepoResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(RepoError::Validation(_)) => {
            *dropped += 1;
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn parse_attribute(
    record: &Record<'_>,
    position: usize,
    object_type_ids: &HashMap<i64, i64>,
) -> Option<(i64, Attribute)> {
    let old_id = record.int("id")?;
    let object_type_id = *object_type_ids.get(&record.int("object_type_id")?)?;
    let label = record.text("label")?;
    let kind = AttributeKind::parse(record.text("type")?).ok()?;
    let key = record
        .text("key")
        .map(str::to_string)
        .unwrap_or_else(|| derive_key(label));
    Some((
        old_id,
        Attribute {
            id: 0,
            object_type_id,
            label: label.to_string(),
            key,
            kind,
            required: record.flag("required").unwrap_or(false),
            order_index: record.int("order_index").unwrap_or(position as i64),
        },
    ))
}

fn parse_observation(
    record: &Record<'_>,
    session_ids: &HashMap<i64, i64>,
    object_type_ids: &HashMap<i64, i64>,
) -> Option<(i64, Observation)> {
    let old_id = record.int("id")?;
    let session_id = *session_ids.get(&record.int("session_id")?)?;
    let object_type_id = *object_type_ids.get(&record.int("object_type_id")?)?;
    let status = record
        .text("status")
        .and_then(|text| ObservationStatus::parse(text).ok())
        .unwrap_or(ObservationStatus::Draft);
    let map_visible = record
        .text_any(&["map_visible", "mapVisible"])
        .and_then(super::csv_text::parse_flag)
        .unwrap_or(true);
    Some((
        old_id,
        Observation {
            id: 0,
            session_id,
            object_type_id,
            latitude: record.real("latitude")?,
            longitude: record.real("longitude")?,
            captured_at: record.int("captured_at").unwrap_or_else(now_epoch_ms),
            notes: record.text("notes").map(str::to_string),
            status,
            map_visible,
        },
    ))
}
