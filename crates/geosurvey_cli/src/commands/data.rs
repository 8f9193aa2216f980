use clap::Args;
use geosurvey_core::{seed_demo_project, ProjectService, SeedOutcome, SqliteSchemaRepository};

use super::{change_bus, confirm, open_database};
use crate::config::Config;

#[derive(Args)]
pub struct SeedCommand {}

impl SeedCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let conn = open_database(config)?;
        match seed_demo_project(&conn, &change_bus())? {
            SeedOutcome::Created(id) => println!("Created demo project (id {id})"),
            SeedOutcome::AlreadyPresent(id) => {
                println!("Demo project already present (id {id})")
            }
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct WipeCommand {
    /// Skip confirmation prompt
    #[arg(long, short)]
    pub force: bool,
}

impl WipeCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        if !self.force && !confirm("Delete ALL projects and observations?")? {
            println!("Cancelled.");
            return Ok(());
        }
        let conn = open_database(config)?;
        ProjectService::new(SqliteSchemaRepository::try_new(&conn)?, change_bus()).wipe_all()?;
        println!("All survey data deleted.");
        Ok(())
    }
}
