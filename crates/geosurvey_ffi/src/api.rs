//! FFI use-case API for Flutter-facing calls.
//!
//! # Responsibility
//! - Expose project, form builder, survey and CSV exchange use cases to Dart
//!   via FRB.
//! - Own the process-wide change bus and per-project sync locks.
//!
//! # Invariants
//! - Exported functions must not panic across FFI boundary.
//! - Failures come back as `ok=false` envelopes with a readable message.
//! - Every call opens its own connection; all calls share one `ChangeBus`.

use geosurvey_core::db::open_db;
use geosurvey_core::live::{load_observation_feed, ObservationFeedItem};
use geosurvey_core::service::survey_service::{
    resolve_location, AnswerInput, LocationError, LocationProvider, DEFAULT_LOCATION,
};
use geosurvey_core::{
    core_version as core_version_inner, export_file_name, export_project, import_project,
    init_logging as init_logging_inner, ping as ping_inner, seed_demo_project, write_export,
    AttributeKind, ChangeBus, ExportMode, FormSyncService, FormTree, GeoPoint, ProjectLocks,
    ProjectService, SchemaRepository, SqliteSchemaRepository, SurveyService, VisibilityFilter,
};
use log::error;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

const DB_FILE_NAME: &str = "geosurvey.sqlite3";
const EXPORT_DIR_NAME: &str = "geosurvey_exports";
static DB_PATH: OnceLock<PathBuf> = OnceLock::new();
static EXPORT_DIR: OnceLock<PathBuf> = OnceLock::new();
static CHANGE_BUS: OnceLock<Arc<ChangeBus>> = OnceLock::new();
static SYNC_LOCKS: OnceLock<Arc<ProjectLocks>> = OnceLock::new();

/// Minimal health-check API for FRB smoke integration.
///
/// # FFI contract
/// - Sync call, non-blocking.
/// - Never throws; always returns a UTF-8 string.
#[flutter_rust_bridge::frb(sync)]
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Expose core crate version through FFI.
#[flutter_rust_bridge::frb(sync)]
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes Rust core logging once per process.
///
/// Input semantics:
/// - `level`: one of `trace|debug|info|warn|error` (case-insensitive).
/// - `log_dir`: absolute directory path where rolling logs are written.
///
/// # FFI contract
/// - Safe to call repeatedly with the same `level + log_dir` (idempotent).
/// - Reconfiguration attempts with different level or directory return error.
/// - Never panics; returns empty string on success and error message on failure.
#[flutter_rust_bridge::frb(sync)]
pub fn init_logging(level: String, log_dir: String) -> String {
    match init_logging_inner(level.as_str(), log_dir.as_str()) {
        Ok(()) => String::new(),
        Err(err) => err.to_string(),
    }
}

/// Generic action response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResponse {
    /// Whether operation succeeded.
    pub ok: bool,
    /// Id of the created or affected row, when there is one.
    pub id: Option<i64>,
    /// Human-readable response message for diagnostics/UI.
    pub message: String,
}

impl ActionResponse {
    fn success(message: impl Into<String>, id: Option<i64>) -> Self {
        Self {
            ok: true,
            id,
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id: None,
            message: message.into(),
        }
    }

    fn from_result(op: &str, done: &str, result: Result<Option<i64>, String>) -> Self {
        match result {
            Ok(id) => Self::success(done, id),
            Err(err) => Self::failure(format!("{op} failed: {err}")),
        }
    }
}

/// Project row for list screens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectItem {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectListResponse {
    pub ok: bool,
    /// Newest first.
    pub items: Vec<ProjectItem>,
    pub message: String,
}

/// Form tree of one project serialized as JSON.
///
/// Shape: `{"objects":[{"id","name","color","attributes":[{"id","label",
/// "kind","required","options":[{"id","text"}]}]}]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormResponse {
    pub ok: bool,
    pub tree_json: String,
    pub message: String,
}

/// One typed answer from the observation form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfiAnswer {
    pub attribute_id: i64,
    /// Blank or `None` leaves the attribute unanswered.
    pub value: Option<String>,
}

/// Observation row for map markers and lists.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationItem {
    pub id: i64,
    pub object_type_id: i64,
    pub object_type_name: String,
    /// Marker color; `#cccccc` when the object type has none.
    pub color: String,
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: i64,
    pub map_visible: bool,
    /// `label: value` lines in attribute order.
    pub summary: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationListResponse {
    pub ok: bool,
    /// Newest first.
    pub items: Vec<ObservationItem>,
    pub message: String,
}

/// Result of writing an export file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportResponse {
    pub ok: bool,
    /// Absolute path of the written file; hand it to the platform share sheet.
    pub path: Option<String>,
    pub message: String,
}

/// Lists all projects.
///
/// # FFI contract
/// - Sync call, DB-backed execution.
/// - Never panics.
#[flutter_rust_bridge::frb(sync)]
pub fn list_projects() -> ProjectListResponse {
    let result = with_conn("list_projects", |conn| {
        let repo = SqliteSchemaRepository::try_new(conn).map_err(|err| err.to_string())?;
        repo.list_projects().map_err(|err| err.to_string())
    });
    match result {
        Ok(projects) => ProjectListResponse {
            ok: true,
            message: format!("Found {} project(s).", projects.len()),
            items: projects
                .into_iter()
                .map(|project| ProjectItem {
                    id: project.id,
                    name: project.name,
                    created_at: project.created_at,
                })
                .collect(),
        },
        Err(err) => ProjectListResponse {
            ok: false,
            items: Vec::new(),
            message: format!("list_projects failed: {err}"),
        },
    }
}

/// Creates a project and returns its id.
#[flutter_rust_bridge::frb(sync)]
pub fn create_project(name: String) -> ActionResponse {
    let result = with_project_service("create_project", |service| {
        service.create_project(&name).map(|project| Some(project.id))
    });
    ActionResponse::from_result("create_project", "Project created.", result)
}

/// Deletes a project with all its forms and observations.
#[flutter_rust_bridge::frb(sync)]
pub fn delete_project(project_id: i64) -> ActionResponse {
    let result = with_project_service("delete_project", |service| {
        service.delete_project(project_id).map(|()| Some(project_id))
    });
    ActionResponse::from_result("delete_project", "Project deleted.", result)
}

/// Adds an object type at the end of the project's form.
///
/// `color` is `#RGB`/`#RRGGBB`; blank means no color.
#[flutter_rust_bridge::frb(sync)]
pub fn add_object_type(project_id: i64, name: String, color: Option<String>) -> ActionResponse {
    let result = with_project_service("add_object_type", |service| {
        service
            .add_object_type(project_id, &name, color.as_deref())
            .map(Some)
    });
    ActionResponse::from_result("add_object_type", "Object type added.", result)
}

#[flutter_rust_bridge::frb(sync)]
pub fn delete_object_type(object_type_id: i64) -> ActionResponse {
    let result = with_project_service("delete_object_type", |service| {
        service.delete_object_type(object_type_id).map(|()| Some(object_type_id))
    });
    ActionResponse::from_result("delete_object_type", "Object type deleted.", result)
}

/// Adds an attribute; `kind` is `text|number|boolean|date|image|select`.
#[flutter_rust_bridge::frb(sync)]
pub fn add_attribute(object_type_id: i64, label: String, kind: String) -> ActionResponse {
    let kind = match AttributeKind::parse(&kind) {
        Ok(kind) => kind,
        Err(err) => return ActionResponse::failure(format!("add_attribute failed: {err}")),
    };
    let result = with_project_service("add_attribute", |service| {
        service.add_attribute(object_type_id, &label, kind).map(Some)
    });
    ActionResponse::from_result("add_attribute", "Attribute added.", result)
}

#[flutter_rust_bridge::frb(sync)]
pub fn delete_attribute(attribute_id: i64) -> ActionResponse {
    let result = with_project_service("delete_attribute", |service| {
        service.delete_attribute(attribute_id).map(|()| Some(attribute_id))
    });
    ActionResponse::from_result("delete_attribute", "Attribute deleted.", result)
}

/// Loads the form tree of a project as JSON for the form builder.
#[flutter_rust_bridge::frb(sync)]
pub fn load_form(project_id: i64) -> FormResponse {
    let result = with_conn("load_form", |conn| {
        let service = FormSyncService::try_new(conn, sync_locks(), change_bus())
            .map_err(|err| err.to_string())?;
        let tree = service.load_tree(project_id).map_err(|err| err.to_string())?;
        serde_json::to_string(&tree).map_err(|err| err.to_string())
    });
    match result {
        Ok(tree_json) => FormResponse {
            ok: true,
            tree_json,
            message: "Form loaded.".to_string(),
        },
        Err(err) => FormResponse {
            ok: false,
            tree_json: String::new(),
            message: format!("load_form failed: {err}"),
        },
    }
}

/// Persists an edited form tree and returns it with fresh ids filled in.
///
/// # FFI contract
/// - All-or-nothing: on failure nothing is written and `tree_json` is the
///   input unchanged.
#[flutter_rust_bridge::frb(sync)]
pub fn sync_form(project_id: i64, tree_json: String) -> FormResponse {
    let mut tree = match serde_json::from_str::<FormTree>(&tree_json) {
        Ok(tree) => tree,
        Err(err) => {
            return FormResponse {
                ok: false,
                tree_json,
                message: format!("sync_form failed: malformed form tree: {err}"),
            }
        }
    };
    let result = with_conn("sync_form", |conn| {
        let service = FormSyncService::try_new(conn, sync_locks(), change_bus())
            .map_err(|err| err.to_string())?;
        service
            .sync(project_id, &mut tree)
            .map_err(|err| err.to_string())
    });
    match result.and_then(|report| {
        serde_json::to_string(&tree)
            .map(|json| (report, json))
            .map_err(|err| err.to_string())
    }) {
        Ok((report, json)) => FormResponse {
            ok: true,
            tree_json: json,
            message: format!(
                "Form saved ({} inserted, {} updated, {} deleted).",
                report.inserted, report.updated, report.deleted
            ),
        },
        Err(err) => FormResponse {
            ok: false,
            tree_json,
            message: format!("sync_form failed: {err}"),
        },
    }
}

/// Position reported by the device, if any.
struct ReportedLocation(Option<GeoPoint>);

impl LocationProvider for ReportedLocation {
    fn current_location(&self) -> Result<GeoPoint, LocationError> {
        self.0
            .ok_or_else(|| LocationError::Unavailable("no fix reported".to_string()))
    }
}

/// Saves one observation and returns its id.
///
/// Missing coordinates fall back to the default map center.
#[flutter_rust_bridge::frb(sync)]
pub fn save_observation(
    project_id: i64,
    object_type_id: i64,
    latitude: Option<f64>,
    longitude: Option<f64>,
    answers: Vec<FfiAnswer>,
) -> ActionResponse {
    let reported = latitude
        .zip(longitude)
        .map(|(latitude, longitude)| GeoPoint::new(latitude, longitude));
    let location = resolve_location(&ReportedLocation(reported), DEFAULT_LOCATION);
    let answers = answers
        .into_iter()
        .map(|answer| AnswerInput {
            attribute_id: answer.attribute_id,
            value: answer.value,
        })
        .collect::<Vec<_>>();
    let result = with_conn("save_observation", |conn| {
        let service = SurveyService::try_new(conn, change_bus()).map_err(|err| err.to_string())?;
        service
            .save_observation(project_id, object_type_id, location, &answers)
            .map(|saved| Some(saved.observation_id))
            .map_err(|err| err.to_string())
    });
    ActionResponse::from_result("save_observation", "Observation saved.", result)
}

/// Lists observations of a project, optionally only map-visible ones.
#[flutter_rust_bridge::frb(sync)]
pub fn list_observations(project_id: i64, visible_only: bool) -> ObservationListResponse {
    let filter = if visible_only {
        VisibilityFilter::MapVisibleOnly
    } else {
        VisibilityFilter::All
    };
    let result = with_conn("list_observations", |conn| {
        load_observation_feed(conn, project_id, filter).map_err(|err| err.to_string())
    });
    match result {
        Ok(items) => ObservationListResponse {
            ok: true,
            message: format!("Found {} observation(s).", items.len()),
            items: items.into_iter().map(to_observation_item).collect(),
        },
        Err(err) => ObservationListResponse {
            ok: false,
            items: Vec::new(),
            message: format!("list_observations failed: {err}"),
        },
    }
}

#[flutter_rust_bridge::frb(sync)]
pub fn set_observation_visibility(observation_id: i64, visible: bool) -> ActionResponse {
    let result = with_conn("set_observation_visibility", |conn| {
        let service = SurveyService::try_new(conn, change_bus()).map_err(|err| err.to_string())?;
        service
            .set_map_visible(observation_id, visible)
            .map(|()| Some(observation_id))
            .map_err(|err| err.to_string())
    });
    ActionResponse::from_result(
        "set_observation_visibility",
        "Observation visibility updated.",
        result,
    )
}

/// Exports a project to CSV and writes it to the export directory.
///
/// `mode` is `whole` or `locations`.
#[flutter_rust_bridge::frb(sync)]
pub fn export_project_csv(project_id: i64, mode: String) -> ExportResponse {
    let mode = match mode.trim().to_ascii_lowercase().as_str() {
        "whole" => ExportMode::WholeProject,
        "locations" => ExportMode::LocationsOnly,
        other => {
            return ExportResponse {
                ok: false,
                path: None,
                message: format!("export_project_csv failed: unknown mode `{other}`"),
            }
        }
    };
    let result = with_conn("export_project_csv", |conn| {
        let repo = SqliteSchemaRepository::try_new(conn).map_err(|err| err.to_string())?;
        let project = repo
            .get_project(project_id)
            .map_err(|err| err.to_string())?
            .ok_or_else(|| format!("project {project_id} not found"))?;
        let text = export_project(conn, project_id, mode).map_err(|err| err.to_string())?;
        write_export(
            &resolve_export_dir(),
            &export_file_name(&project.name, mode),
            &text,
        )
        .map_err(|err| err.to_string())
    });
    match result {
        Ok(path) => ExportResponse {
            ok: true,
            path: Some(path.to_string_lossy().into_owned()),
            message: "Export written.".to_string(),
        },
        Err(err) => ExportResponse {
            ok: false,
            path: None,
            message: format!("export_project_csv failed: {err}"),
        },
    }
}

/// Imports CSV text as a new project and returns the new project id.
#[flutter_rust_bridge::frb(sync)]
pub fn import_project_csv(text: String) -> ActionResponse {
    let result = with_conn("import_project_csv", |conn| {
        import_project(conn, &text, &change_bus()).map_err(|err| err.to_string())
    });
    match result {
        Ok(report) => ActionResponse::success(
            format!(
                "Imported `{}` ({} observation(s), {} row(s) skipped).",
                report.project_name,
                report.observations,
                report.dropped_rows
            ),
            Some(report.project_id),
        ),
        Err(err) => ActionResponse::failure(format!("import_project_csv failed: {err}")),
    }
}

/// Creates `DemoProject` unless it exists; returns its id either way.
#[flutter_rust_bridge::frb(sync)]
pub fn seed_demo() -> ActionResponse {
    let result = with_conn("seed_demo", |conn| {
        seed_demo_project(conn, &change_bus())
            .map(|outcome| Some(outcome.project_id()))
            .map_err(|err| err.to_string())
    });
    ActionResponse::from_result("seed_demo", "Demo project ready.", result)
}

/// Deletes every project, form and observation.
#[flutter_rust_bridge::frb(sync)]
pub fn wipe_all() -> ActionResponse {
    let result = with_project_service("wipe_all", |service| service.wipe_all().map(|()| None));
    ActionResponse::from_result("wipe_all", "All data deleted.", result)
}

/// Sum of all table revisions; poll it to know when to refresh screens.
#[flutter_rust_bridge::frb(sync)]
pub fn data_revision() -> u64 {
    change_bus().global_revision()
}

fn to_observation_item(item: ObservationFeedItem) -> ObservationItem {
    let summary = item
        .answers
        .iter()
        .filter_map(|answer| {
            answer
                .value_text
                .as_deref()
                .map(|value| format!("{}: {value}", answer.label))
        })
        .collect();
    ObservationItem {
        id: item.observation.id,
        object_type_id: item.observation.object_type_id,
        color: item.marker_color().to_string(),
        object_type_name: item.object_type_name,
        latitude: item.observation.latitude,
        longitude: item.observation.longitude,
        captured_at: item.observation.captured_at,
        map_visible: item.observation.map_visible,
        summary,
    }
}

fn change_bus() -> Arc<ChangeBus> {
    Arc::clone(CHANGE_BUS.get_or_init(|| Arc::new(ChangeBus::new())))
}

fn sync_locks() -> Arc<ProjectLocks> {
    Arc::clone(SYNC_LOCKS.get_or_init(|| Arc::new(ProjectLocks::new())))
}

fn path_from_env(var: &str, default: PathBuf) -> PathBuf {
    if let Ok(raw) = std::env::var(var) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    default
}

fn resolve_db_path() -> PathBuf {
    DB_PATH
        .get_or_init(|| {
            path_from_env("GEOSURVEY_DB_PATH", std::env::temp_dir().join(DB_FILE_NAME))
        })
        .clone()
}

fn resolve_export_dir() -> PathBuf {
    EXPORT_DIR
        .get_or_init(|| {
            path_from_env(
                "GEOSURVEY_EXPORT_DIR",
                std::env::temp_dir().join(EXPORT_DIR_NAME),
            )
        })
        .clone()
}

fn with_conn<T>(
    op: &'static str,
    f: impl FnOnce(&Connection) -> Result<T, String>,
) -> Result<T, String> {
    let conn = open_db(resolve_db_path()).map_err(|err| {
        error!("event=ffi_call module=ffi status=error op={op} error_code=db_open_failed");
        format!("DB open failed: {err}")
    })?;
    f(&conn)
}

fn with_project_service(
    op: &'static str,
    f: impl FnOnce(
        &ProjectService<SqliteSchemaRepository<'_>>,
    ) -> geosurvey_core::RepoResult<Option<i64>>,
) -> Result<Option<i64>, String> {
    with_conn(op, |conn| {
        let repo = SqliteSchemaRepository::try_new(conn).map_err(|err| err.to_string())?;
        let service = ProjectService::new(repo, change_bus());
        f(&service).map_err(|err| err.user_message())
    })
}

#[cfg(test)]
mod tests {
    use super::{
        add_attribute, add_object_type, core_version, create_project, data_revision,
        delete_project, export_project_csv, import_project_csv, init_logging, list_observations,
        list_projects, load_form, ping, save_observation, set_observation_visibility, sync_form,
        FfiAnswer,
    };
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }

    #[test]
    fn init_logging_rejects_empty_log_dir() {
        let error = init_logging("info".to_string(), String::new());
        assert!(!error.is_empty());
    }

    #[test]
    fn init_logging_rejects_unsupported_level() {
        let error = init_logging("verbose".to_string(), "tmp/logs".to_string());
        assert!(!error.is_empty());
    }

    #[test]
    fn created_project_is_listed_and_deletable() {
        let name = unique_token("ffi-project");
        let created = create_project(name.clone());
        assert!(created.ok, "{}", created.message);
        let project_id = created.id.expect("create should return id");

        let listed = list_projects();
        assert!(listed.ok, "{}", listed.message);
        assert!(listed
            .items
            .iter()
            .any(|item| item.id == project_id && item.name == name));

        let deleted = delete_project(project_id);
        assert!(deleted.ok, "{}", deleted.message);
        assert!(!delete_project(project_id).ok);
    }

    #[test]
    fn blank_project_name_is_reported_not_panicked() {
        let response = create_project("   ".to_string());
        assert!(!response.ok);
        assert!(response.message.starts_with("create_project failed"));
    }

    #[test]
    fn form_json_round_trips_through_sync() {
        let project_id = create_project(unique_token("ffi-form")).id.expect("project id");
        let draft = r##"{"objects":[{"name":"Tree","color":"#7FD87F","attributes":[
            {"label":"Condition","kind":"select","options":[{"text":"Good"},{"text":"Bad"}]}
        ]}]}"##;

        let saved = sync_form(project_id, draft.to_string());
        assert!(saved.ok, "{}", saved.message);
        assert!(saved.tree_json.contains("\"id\":"));

        let loaded = load_form(project_id);
        assert!(loaded.ok, "{}", loaded.message);
        assert_eq!(loaded.tree_json, saved.tree_json);

        let again = sync_form(project_id, loaded.tree_json);
        assert!(again.message.contains("0 inserted, 0 updated, 0 deleted"));
    }

    #[test]
    fn malformed_form_json_is_returned_unchanged() {
        let response = sync_form(1, "{not json".to_string());
        assert!(!response.ok);
        assert_eq!(response.tree_json, "{not json");
    }

    #[test]
    fn observation_without_fix_uses_default_location() {
        let project_id = create_project(unique_token("ffi-survey")).id.expect("project id");
        let tree = add_object_type(project_id, "Tree".to_string(), None)
            .id
            .expect("object type id");
        let height = add_attribute(tree, "Height".to_string(), "number".to_string())
            .id
            .expect("attribute id");

        let saved = save_observation(
            project_id,
            tree,
            None,
            None,
            vec![FfiAnswer {
                attribute_id: height,
                value: Some("12".to_string()),
            }],
        );
        assert!(saved.ok, "{}", saved.message);

        let listed = list_observations(project_id, false);
        assert_eq!(listed.items.len(), 1);
        assert_eq!(listed.items[0].latitude, 52.2215);
        assert_eq!(listed.items[0].color, "#cccccc");
        assert_eq!(listed.items[0].summary, vec!["Height: 12".to_string()]);

        let before = data_revision();
        let hidden = set_observation_visibility(listed.items[0].id, false);
        assert!(hidden.ok, "{}", hidden.message);
        assert!(data_revision() > before);
        assert!(list_observations(project_id, true).items.is_empty());
    }

    #[test]
    fn unknown_attribute_kind_is_rejected() {
        let response = add_attribute(1, "Shape".to_string(), "polygon".to_string());
        assert!(!response.ok);
    }

    #[test]
    fn export_then_import_creates_a_second_project() {
        let name = unique_token("ffi export");
        let project_id = create_project(name).id.expect("project id");
        add_object_type(project_id, "Bench".to_string(), Some("#6A9FFB".to_string()));

        let exported = export_project_csv(project_id, "whole".to_string());
        assert!(exported.ok, "{}", exported.message);
        let path = exported.path.expect("export path");
        assert!(path.ends_with("_whole_export.csv"));

        let text = std::fs::read_to_string(&path).unwrap();
        let imported = import_project_csv(text);
        assert!(imported.ok, "{}", imported.message);
        assert_ne!(imported.id, Some(project_id));

        assert!(!export_project_csv(project_id, "pdf".to_string()).ok);
    }

    fn unique_token(prefix: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time went backwards")
            .as_nanos();
        format!("{prefix}-{nanos}")
    }
}
