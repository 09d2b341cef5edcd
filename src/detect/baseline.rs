//! Rolling per-metric baselines.
//!
//! Welford's single-pass method keeps mean and variance current without
//! retaining any sample history, so baseline memory is bounded by the number
//! of live metric identities regardless of uptime.

use serde::{Deserialize, Serialize};

use crate::detect::DetectError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Baseline {
    pub count: u64,
    pub mean: f64,
    /// Sum of squared deviations from the running mean (Welford's M2).
    pub m2: f64,
}

impl Baseline {
    pub fn from_parts(count: u64, mean: f64, m2: f64) -> Self {
        Self { count, mean, m2 }
    }

    /// Fold one observation into the baseline.
    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Sample variance. Zero until there are two observations.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        self.m2 / (self.count - 1) as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Deviation of `value` from the baseline, in standard deviations.
    ///
    /// Refuses to judge before `min_observations` samples have been folded
    /// in. A constant baseline gives infinite deviation for any differing
    /// value and zero for an equal one.
    pub fn deviation(&self, value: f64, min_observations: u64) -> Result<f64, DetectError> {
        if self.count < min_observations {
            return Err(DetectError::InsufficientBaseline {
                needed: min_observations,
                have: self.count,
            });
        }
        let std = self.std_dev();
        if std <= f64::EPSILON {
            if (value - self.mean).abs() > f64::EPSILON {
                return Ok(f64::INFINITY);
            }
            return Ok(0.0);
        }
        Ok((value - self.mean).abs() / std)
    }
}
