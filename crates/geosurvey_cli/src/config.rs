//! CLI configuration: YAML file, environment overrides, platform defaults.
//!
//! Priority is env vars > config file > defaults. Relative paths in the file
//! resolve against the file's directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "geosurvey";

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// SQLite survey database
    pub database_path: ConfigValue<PathBuf>,
    /// Where CSV exports are written
    pub export_dir: ConfigValue<PathBuf>,
    /// `trace|debug|info|warn|error`
    pub log_level: ConfigValue<String>,
    /// Rolling log directory; must be absolute
    pub log_dir: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    export_dir: Option<PathBuf>,
    log_level: Option<String>,
    log_dir: Option<PathBuf>,
}

impl Config {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let data_dir = Self::default_data_dir();
        let mut database_path =
            ConfigValue::new(data_dir.join("geosurvey.sqlite3"), ConfigSource::Default);
        let mut export_dir = ConfigValue::new(data_dir.join("exports"), ConfigSource::Default);
        let mut log_level = ConfigValue::new(
            geosurvey_core::default_log_level().to_string(),
            ConfigSource::Default,
        );
        let mut log_dir = ConfigValue::new(data_dir.join("logs"), ConfigSource::Default);
        let mut config_file = None;

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            if let Some(value) = file_config.database_path {
                database_path = ConfigValue::new(resolve(&path, value), ConfigSource::File);
            }
            if let Some(value) = file_config.export_dir {
                export_dir = ConfigValue::new(resolve(&path, value), ConfigSource::File);
            }
            if let Some(value) = file_config.log_level {
                log_level = ConfigValue::new(value, ConfigSource::File);
            }
            if let Some(value) = file_config.log_dir {
                log_dir = ConfigValue::new(resolve(&path, value), ConfigSource::File);
            }
            config_file = Some(path);
        }

        if let Some(value) = env_value("GEOSURVEY_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(value), ConfigSource::Environment);
        }
        if let Some(value) = env_value("GEOSURVEY_EXPORT_DIR") {
            export_dir = ConfigValue::new(PathBuf::from(value), ConfigSource::Environment);
        }
        if let Some(value) = env_value("GEOSURVEY_LOG_LEVEL") {
            log_level = ConfigValue::new(value, ConfigSource::Environment);
        }

        Ok(Self {
            database_path,
            export_dir,
            log_level,
            log_dir,
            config_file,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/geosurvey/
    /// - macOS: ~/Library/Application Support/geosurvey/
    /// - Windows: %APPDATA%/geosurvey/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/geosurvey/
    /// - macOS: ~/Library/Application Support/geosurvey/
    /// - Windows: %APPDATA%/geosurvey/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

fn resolve(config_path: &Path, value: PathBuf) -> PathBuf {
    if value.is_relative() {
        config_path
            .parent()
            .map(|parent| parent.join(&value))
            .unwrap_or(value)
    } else {
        value
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
