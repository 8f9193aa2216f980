//! CSV exchange of whole projects.
//!
//! # Responsibility
//! - Export one project as sectioned CSV text and hand the file to a share
//!   collaborator.
//! - Import sectioned CSV text as a new project.
//!
//! # Invariants
//! - Exports only contain rows of the exported project.
//! - Imports never modify existing projects.

pub mod csv_text;
pub mod export;
pub mod import;
pub mod share;

use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use export::{export_file_name, export_project, write_export, ExportMode};
pub use import::{import_project, ImportReport};
pub use share::{share_export, ShareOutcome, ShareSheet, CSV_MIME_TYPE};

/// Error for export/import/share operations.
#[derive(Debug)]
pub enum ExchangeError {
    Repo(RepoError),
    Io(std::io::Error),
    /// Share collaborator reported a failure.
    Share(String),
}

impl Display for ExchangeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "csv file i/o failed: {err}"),
            Self::Share(message) => write!(f, "sharing export failed: {message}"),
        }
    }
}

impl Error for ExchangeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Share(_) => None,
        }
    }
}

impl From<RepoError> for ExchangeError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for ExchangeError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

impl From<std::io::Error> for ExchangeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
