//! Carbon intensity estimation for a grid zone
//!
//! This module fetches the latest generation mix of a zone, maps the
//! provider's production-type labels to fuel categories and weights them by
//! per-zone emission factors.

pub mod api;
pub mod estimator;
pub mod export;
pub mod factors;
pub mod provider;
pub mod types;
pub mod zones;

pub use api::EntsoeClient;
pub use estimator::CarbonIntensityEstimator;
pub use export::CsvExportProvider;
pub use factors::{EmissionFactorTable, LabelMapping};
pub use provider::GenerationProvider;
pub use types::{CarbonIntensityResult, GenerationSample, GenerationTable, QueryWindow};
