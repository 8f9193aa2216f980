use clap::{Args, Subcommand};
use geosurvey_core::model::schema::ObjectTypeTree;
use geosurvey_core::{ProjectService, SqliteSchemaRepository};

use super::{change_bus, confirm, open_database, OutputFormat};
use crate::config::Config;

#[derive(Args)]
pub struct ProjectCommand {
    #[command(subcommand)]
    pub command: ProjectSubcommand,
}

#[derive(Subcommand)]
pub enum ProjectSubcommand {
    /// List projects, newest first
    List {
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Create a new project
    Create {
        /// Project name
        name: String,
    },

    /// Rename a project
    Rename {
        /// Project id
        id: i64,
        /// New name
        name: String,
    },

    /// Delete a project and everything recorded in it
    Delete {
        /// Project id
        id: i64,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Show the object types and attributes of a project
    Show {
        /// Project id
        id: i64,

        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ProjectCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let conn = open_database(config)?;
        let service = ProjectService::new(SqliteSchemaRepository::try_new(&conn)?, change_bus());

        match &self.command {
            ProjectSubcommand::List { format } => {
                let projects = service.list_projects()?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&projects)?);
                    }
                    OutputFormat::Text => {
                        if projects.is_empty() {
                            println!("No projects yet.");
                        }
                        for project in &projects {
                            println!("{:>4}  {}", project.id, project.name);
                        }
                    }
                }
            }

            ProjectSubcommand::Create { name } => {
                let project = service.create_project(name)?;
                println!("Created project '{}' (id {})", project.name, project.id);
            }

            ProjectSubcommand::Rename { id, name } => {
                service.rename_project(*id, name)?;
                println!("Renamed project {id} to '{}'", name.trim());
            }

            ProjectSubcommand::Delete { id, force } => {
                if !force && !confirm(&format!("Delete project {id} and all its observations?"))? {
                    println!("Cancelled.");
                    return Ok(());
                }
                service.delete_project(*id)?;
                println!("Deleted project {id}");
            }

            ProjectSubcommand::Show { id, format } => {
                let tree = service.load_tree(*id)?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tree)?),
                    OutputFormat::Text => print_tree(&tree),
                }
            }
        }
        Ok(())
    }
}

fn print_tree(tree: &[ObjectTypeTree]) {
    if tree.is_empty() {
        println!("No object types.");
        return;
    }
    for item in tree {
        let object_type = &item.object_type;
        match &object_type.color {
            Some(color) => println!("{} [{}]", object_type.name, color),
            None => println!("{}", object_type.name),
        }
        for entry in &item.attributes {
            let attribute = &entry.attribute;
            let required = if attribute.required { " *" } else { "" };
            println!(
                "  - {} ({}, {}){required}",
                attribute.label,
                attribute.key,
                attribute.kind.as_str()
            );
            for option in &entry.options {
                println!("      · {}", option.value_text);
            }
        }
    }
}
