//! `geosurvey` command-line entry point.
//!
//! # Responsibility
//! - Drive project maintenance, CSV exchange and demo seeding against the
//!   same SQLite database the mobile shell uses.
//! - Start file logging before any command touches the database.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::{
    ConfigCommand, ExportCommand, ImportCommand, ProjectCommand, SeedCommand, WipeCommand,
};
use config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "geosurvey")]
#[command(version, about = "Field survey projects, forms and observations", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage projects
    Project(ProjectCommand),
    /// Export a project as CSV
    Export(ExportCommand),
    /// Import a CSV export as a new project
    Import(ImportCommand),
    /// Create the demo project with sample observations
    Seed(SeedCommand),
    /// Delete every project
    Wipe(WipeCommand),
    /// Manage configuration
    Config(ConfigCommand),
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load(cli.config)?;

    if let Err(err) = geosurvey_core::init_logging(
        &config.log_level.value,
        &config.log_dir.value.to_string_lossy(),
    ) {
        eprintln!("Warning: file logging disabled: {err}");
    }
    log::info!(
        "event=app_start module=cli status=ok version={}",
        geosurvey_core::core_version()
    );

    match cli.command {
        Some(Commands::Project(cmd)) => cmd.run(&config)?,
        Some(Commands::Export(cmd)) => cmd.run(&config)?,
        Some(Commands::Import(cmd)) => cmd.run(&config)?,
        Some(Commands::Seed(cmd)) => cmd.run(&config)?,
        Some(Commands::Wipe(cmd)) => cmd.run(&config)?,
        Some(Commands::Config(cmd)) => cmd.run(&config)?,
        None => {
            println!("geosurvey {}", geosurvey_core::core_version());
            println!("Run 'geosurvey --help' for usage.");
        }
    }

    Ok(())
}
