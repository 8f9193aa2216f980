//! Core domain logic for GeoSurvey field data collection.
//! This crate is the single source of truth for survey invariants.

pub mod db;
pub mod exchange;
pub mod live;
pub mod logging;
pub mod model;
pub mod repo;
pub mod seed;
pub mod service;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use exchange::{
    export_file_name, export_project, import_project, share_export, write_export,
    ExchangeError, ExportMode, ImportReport, ShareOutcome, ShareSheet,
};
pub use live::{ChangeBus, DataTable, LiveQuery, VisibilityFilter};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::observation::{GeoPoint, Observation, ObservationStatus};
pub use model::project::{Project, ProjectId};
pub use model::schema::{Attribute, AttributeKind, AttributeOption, ObjectType};
pub use model::validation::{derive_key, ValidationError};
pub use repo::observation_repo::{ObservationRepository, SqliteObservationRepository};
pub use repo::schema_repo::{SchemaRepository, SqliteSchemaRepository};
pub use repo::{EntityRef, RepoError, RepoResult};
pub use seed::{seed_demo_project, SeedOutcome};
pub use service::form_sync::{FormSyncService, FormTree, ProjectLocks, SyncError, SyncReport};
pub use service::project_service::ProjectService;
pub use service::survey_service::{SurveyError, SurveyService};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
