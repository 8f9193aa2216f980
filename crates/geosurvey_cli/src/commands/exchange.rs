use clap::Args;
use geosurvey_core::{
    export_file_name, export_project, import_project, write_export, EntityRef, ExportMode,
    RepoError, SchemaRepository, SqliteSchemaRepository,
};
use std::path::PathBuf;

use super::{change_bus, open_database};
use crate::config::Config;

#[derive(Args)]
pub struct ExportCommand {
    /// Project id
    pub project_id: i64,

    /// Export one flattened row per answer instead of the whole project
    #[arg(long)]
    pub locations: bool,

    /// Output directory (defaults to the configured export_dir)
    #[arg(long, short)]
    pub out: Option<PathBuf>,

    /// Print the CSV to stdout instead of writing a file
    #[arg(long, conflicts_with = "out")]
    pub stdout: bool,
}

impl ExportCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let conn = open_database(config)?;
        let mode = if self.locations {
            ExportMode::LocationsOnly
        } else {
            ExportMode::WholeProject
        };

        let project = SqliteSchemaRepository::try_new(&conn)?
            .get_project(self.project_id)?
            .ok_or(RepoError::NotFound(EntityRef::Project(self.project_id)))?;
        let text = export_project(&conn, project.id, mode)?;

        if self.stdout {
            print!("{text}");
            return Ok(());
        }

        let dir = self
            .out
            .clone()
            .unwrap_or_else(|| config.export_dir.value.clone());
        let path = write_export(&dir, &export_file_name(&project.name, mode), &text)?;
        println!("Exported '{}' to {}", project.name, path.display());
        Ok(())
    }
}

#[derive(Args)]
pub struct ImportCommand {
    /// CSV file produced by `export`
    pub file: PathBuf,
}

impl ImportCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(&self.file)?;
        let conn = open_database(config)?;
        let report = import_project(&conn, &text, &change_bus())?;

        println!(
            "Imported '{}' as project {}",
            report.project_name, report.project_id
        );
        println!(
            "  {} object types, {} attributes, {} options",
            report.object_types, report.attributes, report.options
        );
        println!(
            "  {} sessions, {} observations, {} answers",
            report.sessions, report.observations, report.answers
        );
        if report.dropped_rows > 0 || report.skipped_sections > 0 {
            println!(
                "  dropped {} rows, skipped {} sections",
                report.dropped_rows, report.skipped_sections
            );
        }
        Ok(())
    }
}
