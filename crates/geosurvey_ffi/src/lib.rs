//! Flutter bridge for the GeoSurvey core.

pub mod api;
