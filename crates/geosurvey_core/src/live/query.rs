//! Auto-refreshing read queries for UI screens.
//!
//! # Responsibility
//! - Cache one query result and re-run the loader only after a dependent
//!   table changed on the `ChangeBus`.
//! - Provide the project list, form tree and observation feed read models.
//!
//! # Invariants
//! - A `LiveQuery` never serves a value older than the last revision of any
//!   table it depends on.
//! - Every loader filters by project id in SQL.

use super::bus::{ChangeBus, DataTable};
use crate::model::observation::{LabeledAnswer, Observation, ObservationId};
use crate::model::project::{Project, ProjectId};
use crate::model::schema::{display_color, ObjectTypeId, ObjectTypeTree};
use crate::repo::observation_repo::parse_observation_row;
use crate::repo::schema_repo::{SchemaRepository, SqliteSchemaRepository};
use crate::repo::RepoResult;
use rusqlite::Connection;
use std::collections::HashMap;

type Loader<T> = Box<dyn Fn(&Connection) -> RepoResult<T> + Send>;

/// Cached query result keyed by table revisions.
pub struct LiveQuery<T> {
    tables: Vec<DataTable>,
    loader: Loader<T>,
    seen_revisions: Option<Vec<u64>>,
    value: Option<T>,
}

impl<T> LiveQuery<T> {
    pub fn new(
        tables: &[DataTable],
        loader: impl Fn(&Connection) -> RepoResult<T> + Send + 'static,
    ) -> Self {
        Self {
            tables: tables.to_vec(),
            loader: Box::new(loader),
            seen_revisions: None,
            value: None,
        }
    }

    /// Tables this query depends on.
    pub fn tables(&self) -> &[DataTable] {
        &self.tables
    }

    /// Whether the next `get` will re-run the loader.
    pub fn is_stale(&self, bus: &ChangeBus) -> bool {
        self.value.is_none()
            || self.seen_revisions.as_deref() != Some(bus.revisions(&self.tables).as_slice())
    }

    /// Returns the cached value, reloading first when stale.
    pub fn get(&mut self, conn: &Connection, bus: &ChangeBus) -> RepoResult<&T> {
        let current = bus.revisions(&self.tables);
        let fresh = self.seen_revisions.as_deref() == Some(current.as_slice());
        let value = match self.value.take() {
            Some(value) if fresh => value,
            _ => (self.loader)(conn)?,
        };
        self.seen_revisions = Some(current);
        Ok(&*self.value.insert(value))
    }

    /// Drops the cached value so the next `get` reloads unconditionally.
    pub fn invalidate(&mut self) {
        self.value = None;
        self.seen_revisions = None;
    }
}

/// Map-marker filter for the observation feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityFilter {
    All,
    MapVisibleOnly,
}

/// Observation merged with its object type and recorded answers.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationFeedItem {
    pub observation: Observation,
    pub object_type_name: String,
    pub color: Option<String>,
    pub answers: Vec<LabeledAnswer>,
}

impl ObservationFeedItem {
    /// Marker color of the object type, or the fallback when unset.
    pub fn marker_color(&self) -> &str {
        display_color(self.color.as_deref())
    }
}

/// Feed items of one object type.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationGroup {
    pub object_type_id: ObjectTypeId,
    pub object_type_name: String,
    pub color: Option<String>,
    pub items: Vec<ObservationFeedItem>,
}

impl ObservationGroup {
    pub fn marker_color(&self) -> &str {
        display_color(self.color.as_deref())
    }
}

/// All projects, newest first.
pub fn project_list_query() -> LiveQuery<Vec<Project>> {
    LiveQuery::new(&[DataTable::Projects], |conn| {
        SqliteSchemaRepository::new(conn).list_projects()
    })
}

/// Object type → attribute → option tree of one project.
pub fn project_tree_query(project_id: ProjectId) -> LiveQuery<Vec<ObjectTypeTree>> {
    LiveQuery::new(&DataTable::SCHEMA, move |conn| {
        SqliteSchemaRepository::new(conn).load_project_tree(project_id)
    })
}

/// Observations of one project merged with their answers, newest first.
pub fn observation_feed_query(
    project_id: ProjectId,
    filter: VisibilityFilter,
) -> LiveQuery<Vec<ObservationFeedItem>> {
    LiveQuery::new(
        &[
            DataTable::ObjectTypes,
            DataTable::Attributes,
            DataTable::SurveySessions,
            DataTable::Observations,
            DataTable::ObservationAnswers,
        ],
        move |conn| load_observation_feed(conn, project_id, filter),
    )
}

/// One-shot load of the observation feed.
pub fn load_observation_feed(
    conn: &Connection,
    project_id: ProjectId,
    filter: VisibilityFilter,
) -> RepoResult<Vec<ObservationFeedItem>> {
    let mut answers = load_project_answers(conn, project_id)?;

    let mut stmt = conn.prepare(
        "SELECT
            o.id AS id,
            o.session_id AS session_id,
            o.object_type_id AS object_type_id,
            o.latitude AS latitude,
            o.longitude AS longitude,
            o.captured_at AS captured_at,
            o.notes AS notes,
            o.status AS status,
            o.map_visible AS map_visible,
            t.name AS object_type_name,
            t.color AS color
         FROM observations o
         INNER JOIN survey_sessions s ON s.id = o.session_id
         INNER JOIN object_types t ON t.id = o.object_type_id
         WHERE s.project_id = ?1
           AND t.project_id = ?1
           AND (?2 = 0 OR o.map_visible = 1)
         ORDER BY o.captured_at DESC, o.id DESC;",
    )?;
    let visible_only = i64::from(filter == VisibilityFilter::MapVisibleOnly);
    let mut rows = stmt.query(rusqlite::params![project_id, visible_only])?;

    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let observation = parse_observation_row(row)?;
        let answers = answers.remove(&observation.id).unwrap_or_default();
        items.push(ObservationFeedItem {
            observation,
            object_type_name: row.get("object_type_name")?,
            color: row.get("color")?,
            answers,
        });
    }
    Ok(items)
}

/// Groups feed items by object type, keeping first-seen group order.
pub fn observations_by_object_type(items: Vec<ObservationFeedItem>) -> Vec<ObservationGroup> {
    let mut groups: Vec<ObservationGroup> = Vec::new();
    for item in items {
        let object_type_id = item.observation.object_type_id;
        match groups
            .iter_mut()
            .find(|group| group.object_type_id == object_type_id)
        {
            Some(group) => group.items.push(item),
            None => groups.push(ObservationGroup {
                object_type_id,
                object_type_name: item.object_type_name.clone(),
                color: item.color.clone(),
                items: vec![item],
            }),
        }
    }
    groups
}

fn load_project_answers(
    conn: &Connection,
    project_id: ProjectId,
) -> RepoResult<HashMap<ObservationId, Vec<LabeledAnswer>>> {
    let mut stmt = conn.prepare(
        "SELECT v.observation_id, v.attribute_id, a.label, a.key, v.value_text
         FROM attribute_coordinate_values v
         INNER JOIN attributes a ON a.id = v.attribute_id
         INNER JOIN observations o ON o.id = v.observation_id
         INNER JOIN survey_sessions s ON s.id = o.session_id
         WHERE s.project_id = ?1
         ORDER BY v.observation_id ASC, a.order_index ASC, a.id ASC;",
    )?;
    let mut rows = stmt.query([project_id])?;
    let mut grouped: HashMap<ObservationId, Vec<LabeledAnswer>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let observation_id: ObservationId = row.get(0)?;
        grouped.entry(observation_id).or_default().push(LabeledAnswer {
            attribute_id: row.get(1)?,
            label: row.get(2)?,
            key: row.get(3)?,
            value_text: row.get(4)?,
        });
    }
    Ok(grouped)
}
