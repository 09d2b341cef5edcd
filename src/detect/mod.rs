//! Statistical anomaly detection over sealed windows.

pub mod baseline;
pub mod engine;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::aggregate::Granularity;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("insufficient baseline data: need {needed} observations, have {have}")]
    InsufficientBaseline { needed: u64, have: u64 },

    #[error("persisted baseline '{identity}' references a metric outside the taxonomy")]
    TaxonomyMismatch { identity: String },
}

/// A statistically notable deviation for one sealed window.
///
/// Emitted alongside the regular aggregate, never instead of it.
#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub identity: String,
    pub granularity: Granularity,
    pub window_start: DateTime<Utc>,
    pub value: f64,
    pub baseline_mean: f64,
    pub baseline_std_dev: f64,
    /// Deviation magnitude in standard deviations. Infinite when the
    /// baseline is constant and the value differs from it.
    pub deviation_sigma: f64,
}
