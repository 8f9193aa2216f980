//! Project root record.

use serde::{Deserialize, Serialize};

/// SQLite-assigned project identifier.
pub type ProjectId = i64;

/// Root of ownership; deleting a project cascades to everything below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}
