//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Publish table changes on the shared `ChangeBus` after successful writes.
//! - Keep UI/FFI layers decoupled from storage details.

pub mod form_sync;
pub mod project_service;
pub mod survey_service;
