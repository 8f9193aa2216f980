//! Demo project for first launch and screenshots.
//!
//! # Invariants
//! - Seeding is idempotent: an existing `DemoProject` is left untouched.
//! - Output is deterministic (fixed points, offsets and answers).

use crate::live::{ChangeBus, DataTable};
use crate::model::observation::{GeoPoint, NewObservation};
use crate::model::project::ProjectId;
use crate::model::schema::{AttributeId, AttributeKind, BOOLEAN_ANSWERS};
use crate::repo::observation_repo::{ObservationRepository, SqliteObservationRepository};
use crate::repo::schema_repo::{SchemaRepository, SqliteSchemaRepository};
use crate::repo::{ensure_connection_ready, RepoError, RepoResult};
use log::info;
use rusqlite::{Connection, Transaction, TransactionBehavior};

pub const DEMO_PROJECT_NAME: &str = "DemoProject";

struct DemoAttribute {
    label: &'static str,
    kind: AttributeKind,
    options: &'static [&'static str],
}

struct DemoObject {
    name: &'static str,
    color: &'static str,
    attributes: [DemoAttribute; 2],
}

const DEMO_OBJECTS: [DemoObject; 3] = [
    DemoObject {
        name: "Tree",
        color: "#7FD87F",
        attributes: [
            DemoAttribute {
                label: "Type",
                kind: AttributeKind::Select,
                options: &["Oak", "Birch", "Fern", "Pine"],
            },
            DemoAttribute {
                label: "Condition",
                kind: AttributeKind::Select,
                options: &["Good", "Medium", "Bad"],
            },
        ],
    },
    DemoObject {
        name: "Car",
        color: "#6A9FFB",
        attributes: [
            DemoAttribute {
                label: "Parked Legal",
                kind: AttributeKind::Boolean,
                options: &[],
            },
            DemoAttribute {
                label: "Color",
                kind: AttributeKind::Select,
                options: &["Red", "Blue", "Black", "White"],
            },
        ],
    },
    DemoObject {
        name: "Bird",
        color: "#F7C95F",
        attributes: [
            DemoAttribute {
                label: "Species",
                kind: AttributeKind::Select,
                options: &["Crow", "Sparrow", "Parrot", "Eagle"],
            },
            DemoAttribute {
                label: "Can Fly",
                kind: AttributeKind::Boolean,
                options: &[],
            },
        ],
    },
];

/// Sample positions around Enschede.
const DEMO_POINTS: [(f64, f64); 5] = [
    (52.2215, 6.8937),
    (52.2248, 6.8871),
    (52.2189, 6.9022),
    (52.2161, 6.8953),
    (52.2285, 6.9049),
];

/// Result of `seed_demo_project`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    Created(ProjectId),
    AlreadyPresent(ProjectId),
}

impl SeedOutcome {
    pub fn project_id(self) -> ProjectId {
        match self {
            Self::Created(id) | Self::AlreadyPresent(id) => id,
        }
    }
}

/// Creates `DemoProject` with three object types, one session and sample
/// observations, unless it already exists.
pub fn seed_demo_project(conn: &Connection, bus: &ChangeBus) -> RepoResult<SeedOutcome> {
    ensure_connection_ready(conn)?;
    let existing = SqliteSchemaRepository::new(conn)
        .list_projects()?
        .into_iter()
        .find(|project| project.name == DEMO_PROJECT_NAME);
    if let Some(project) = existing {
        return Ok(SeedOutcome::AlreadyPresent(project.id));
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let project_id = seed_rows(&tx)?;
    tx.commit()?;

    info!("event=demo_seed module=seed status=ok project_id={project_id}");
    bus.publish(&DataTable::ALL);
    Ok(SeedOutcome::Created(project_id))
}

fn seed_rows(conn: &Connection) -> RepoResult<ProjectId> {
    let schema = SqliteSchemaRepository::new(conn);
    let survey = SqliteObservationRepository::new(conn);

    let project_id = schema.create_project(DEMO_PROJECT_NAME)?;
    let mut forms: Vec<(i64, Vec<AttributeId>)> = Vec::with_capacity(DEMO_OBJECTS.len());
    for object in &DEMO_OBJECTS {
        let object_type_id = schema.add_object_type(project_id, object.name, Some(object.color))?;
        let mut attribute_ids = Vec::with_capacity(object.attributes.len());
        for attribute in &object.attributes {
            let attribute_id =
                schema.add_attribute(object_type_id, attribute.label, attribute.kind, None)?;
            for option in attribute.options {
                schema.add_option(attribute_id, option)?;
            }
            attribute_ids.push(attribute_id);
        }
        forms.push((object_type_id, attribute_ids));
    }

    let session_id = survey.start_session(project_id)?;
    let [(tree, tree_attrs), (car, car_attrs), (bird, bird_attrs)] = forms.as_slice() else {
        return Err(RepoError::InvalidData("demo form count mismatch".to_string()));
    };
    let [true_answer, false_answer] = [BOOLEAN_ANSWERS[0], BOOLEAN_ANSWERS[1]];
    let species = DEMO_OBJECTS[2].attributes[0].options;

    for (index, (latitude, longitude)) in DEMO_POINTS.into_iter().enumerate() {
        let samples: [(i64, f64, &[AttributeId], [&str; 2]); 3] = [
            (*tree, 0.0, tree_attrs, ["Oak", "Good"]),
            (*car, 0.0005, car_attrs, [true_answer, "Blue"]),
            (
                *bird,
                0.001,
                bird_attrs,
                [
                    species[index % species.len()],
                    if index == 3 { false_answer } else { true_answer },
                ],
            ),
        ];
        for (object_type_id, offset, attribute_ids, answers) in samples {
            let observation_id = survey.create_observation(&NewObservation {
                session_id,
                object_type_id,
                location: GeoPoint::new(latitude + offset, longitude + offset),
                notes: None,
                captured_at: None,
            })?;
            for (attribute_id, value) in attribute_ids.iter().zip(answers) {
                survey.upsert_answer(observation_id, *attribute_id, Some(value))?;
            }
        }
    }
    Ok(project_id)
}
