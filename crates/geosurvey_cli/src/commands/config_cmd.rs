use clap::{Args, Subcommand};
use std::fs;
use std::io::Write;

use super::OutputFormat;
use crate::config::{Config, ConfigValue};

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a commented config file to the default location
    Init,
}

const DEFAULT_CONFIG: &str = r#"# geosurvey configuration

# SQLite survey database
# database_path: ~/.local/share/geosurvey/geosurvey.sqlite3

# Directory for CSV exports
# export_dir: ~/.local/share/geosurvey/exports

# trace | debug | info | warn | error
# log_level: info

# Rolling log files; must be absolute
# log_dir: ~/.local/share/geosurvey/logs
"#;

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        print_path("database_path", &config.database_path);
                        print_path("export_dir", &config.export_dir);
                        println!("log_level: {}", config.log_level.value);
                        println!("  source: {}", config.log_level.source);
                        println!();
                        print_path("log_dir", &config.log_dir);
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = Config::default_config_path();

                if config_path.exists() {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'geosurvey config show' to view current configuration.");
                    return Ok(());
                }

                if let Some(parent) = config_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = fs::File::create(&config_path)?;
                file.write_all(DEFAULT_CONFIG.as_bytes())?;

                println!("Created config file: {}", config_path.display());
                Ok(())
            }
        }
    }
}

fn print_path(name: &str, value: &ConfigValue<std::path::PathBuf>) {
    println!("{name}: {}", value.value.display());
    println!("  source: {}", value.source);
    println!();
}
