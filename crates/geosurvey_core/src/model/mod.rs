//! Survey domain model.
//!
//! # Responsibility
//! - Define the records persisted for projects, form schemas and observations.
//! - Keep naming/key/color rules in one place so every write path agrees.
//!
//! # Invariants
//! - Identifiers are SQLite-assigned integer surrogate keys.
//! - Select-option catalog rows and recorded answers are distinct types.

pub mod observation;
pub mod project;
pub mod schema;
pub mod validation;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
