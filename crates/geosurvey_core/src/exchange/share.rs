//! Hand-off of an export file to the platform share sheet.

use super::export::ExportMode;
use super::ExchangeError;
use log::{info, warn};
use std::path::Path;

pub const CSV_MIME_TYPE: &str = "text/csv";

/// Platform share dialog.
pub trait ShareSheet {
    /// Whether sharing works on this device at all.
    fn is_available(&self) -> bool;
    fn share(&self, path: &Path, mime_type: &str, dialog_title: &str) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    Shared,
    /// Device cannot share; the file stays where it was written.
    Unavailable,
}

/// Offers `path` through `sheet`. Unavailability is not an error.
pub fn share_export(
    sheet: &dyn ShareSheet,
    path: &Path,
    mode: ExportMode,
) -> Result<ShareOutcome, ExchangeError> {
    if !sheet.is_available() {
        warn!(
            "event=csv_share module=exchange status=unavailable mode={}",
            mode.as_str()
        );
        return Ok(ShareOutcome::Unavailable);
    }
    sheet
        .share(path, CSV_MIME_TYPE, mode.share_title())
        .map_err(ExchangeError::Share)?;
    info!("event=csv_share module=exchange status=ok mode={}", mode.as_str());
    Ok(ShareOutcome::Shared)
}
