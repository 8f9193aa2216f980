mod config_cmd;
mod data;
mod exchange;
mod project;

pub use config_cmd::ConfigCommand;
pub use data::{SeedCommand, WipeCommand};
pub use exchange::{ExportCommand, ImportCommand};
pub use project::ProjectCommand;

use crate::config::Config;
use clap::ValueEnum;
use geosurvey_core::{open_db, ChangeBus};
use rusqlite::Connection;
use std::io::{self, Write};
use std::sync::Arc;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Opens the configured survey database, creating its directory on first use.
fn open_database(config: &Config) -> Result<Connection, Box<dyn std::error::Error>> {
    if let Some(parent) = config.database_path.value.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(open_db(&config.database_path.value)?)
}

/// Each CLI invocation owns a fresh bus; nothing outlives the process.
fn change_bus() -> Arc<ChangeBus> {
    Arc::new(ChangeBus::new())
}

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y"))
}
