//! Baseline bookkeeping and per-window classification.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::aggregate::{Granularity, SealedWindow};
use crate::detect::baseline::Baseline;
use crate::detect::{Anomaly, DetectError};
use crate::metric::metric_name_of_identity;

type BaselineKey = (String, Granularity);

/// Consumes sealed windows in seal order per identity and flags
/// statistically notable values.
///
/// Hourly and daily observations feed separate baselines so a daily total
/// never skews the hourly statistics for the same identity.
pub struct AnomalyEngine {
    baselines: Mutex<HashMap<BaselineKey, Baseline>>,
    min_observations: u64,
    sigma_threshold: f64,
}

impl AnomalyEngine {
    pub fn new(min_observations: u64, sigma_threshold: f64) -> Self {
        Self {
            baselines: Mutex::new(HashMap::new()),
            min_observations,
            sigma_threshold,
        }
    }

    /// Classify one sealed window's value, then fold it into the baseline.
    ///
    /// Classification happens against the baseline as it stood before this
    /// observation; the observation always updates the baseline afterwards,
    /// anomalous or not.
    pub fn observe(&self, window: &SealedWindow, value: f64) -> Option<Anomaly> {
        let key = (window.identity.clone(), window.granularity);
        let mut baselines = self.baselines.lock().unwrap_or_else(|e| e.into_inner());
        let baseline = baselines.entry(key).or_default();

        let verdict = match baseline.deviation(value, self.min_observations) {
            Ok(sigma) if sigma > self.sigma_threshold => Some(Anomaly {
                identity: window.identity.clone(),
                granularity: window.granularity,
                window_start: window.start,
                value,
                baseline_mean: baseline.mean,
                baseline_std_dev: baseline.std_dev(),
                deviation_sigma: sigma,
            }),
            Ok(_) => None,
            Err(DetectError::InsufficientBaseline { have, needed }) => {
                debug!(identity = %window.identity, have, needed, "baseline warming up");
                None
            }
            Err(_) => None,
        };

        baseline.observe(value);
        verdict
    }

    /// Snapshot every baseline for persistence.
    pub fn snapshot(&self) -> Vec<(String, Granularity, Baseline)> {
        let baselines = self.baselines.lock().unwrap_or_else(|e| e.into_inner());
        baselines
            .iter()
            .map(|((identity, granularity), b)| (identity.clone(), *granularity, *b))
            .collect()
    }

    /// Restore persisted baselines. Entries whose identity references a
    /// metric name no longer in the closed set are dropped with a warning;
    /// restart continues with whatever survives.
    pub fn restore(&self, entries: Vec<(String, Granularity, Baseline)>) -> usize {
        let mut baselines = self.baselines.lock().unwrap_or_else(|e| e.into_inner());
        let mut loaded = 0;
        for (identity, granularity, baseline) in entries {
            if metric_name_of_identity(&identity).is_err() {
                let err = DetectError::TaxonomyMismatch {
                    identity: identity.clone(),
                };
                warn!(%identity, "{err}; dropping baseline");
                continue;
            }
            baselines.insert((identity, granularity), baseline);
            loaded += 1;
        }
        loaded
    }

    pub fn baseline_count(&self) -> usize {
        self.baselines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{SampleStats, WindowState};
    use crate::metric::MetricName;
    use chrono::{TimeZone, Utc};

    fn window(hour: u32) -> SealedWindow {
        SealedWindow {
            identity: "CONNECTION_COUNT".to_string(),
            name: MetricName::ConnectionCount,
            start: Utc.with_ymd_and_hms(2025, 3, 14, hour, 0, 0).unwrap(),
            granularity: Granularity::Hour,
            stats: SampleStats::default(),
            state: WindowState::Sealed,
        }
    }

    #[test]
    fn test_never_flags_before_warm_up() {
        let engine = AnomalyEngine::new(3, 3.0);
        // Huge values, but only two observations
        assert!(engine.observe(&window(0), 1.0).is_none());
        assert!(engine.observe(&window(1), 1_000_000.0).is_none());
    }

    #[test]
    fn test_spike_flagged_after_warm_up() {
        let engine = AnomalyEngine::new(3, 3.0);
        for (h, v) in [10.0, 11.0, 12.0].iter().enumerate() {
            assert!(engine.observe(&window(h as u32), *v).is_none());
        }
        for (h, v) in [10.0, 12.0, 11.0].iter().enumerate() {
            assert!(engine.observe(&window(3 + h as u32), *v).is_none());
        }
        let anomaly = engine.observe(&window(6), 100.0).expect("should flag 100");
        assert!(anomaly.deviation_sigma > 3.0);
        assert_eq!(anomaly.identity, "CONNECTION_COUNT");
    }

    #[test]
    fn test_granularities_have_separate_baselines() {
        let engine = AnomalyEngine::new(3, 3.0);
        for h in 0..5 {
            engine.observe(&window(h), 10.0);
        }
        // Daily total of 240 would be wildly anomalous against the hourly
        // baseline; against its own fresh daily baseline it is just warm-up.
        let mut daily = window(0);
        daily.granularity = Granularity::Day;
        assert!(engine.observe(&daily, 240.0).is_none());
    }

    #[test]
    fn test_restore_drops_taxonomy_mismatch() {
        let engine = AnomalyEngine::new(3, 3.0);
        let loaded = engine.restore(vec![
            (
                "CONNECTION_COUNT".to_string(),
                Granularity::Hour,
                Baseline::from_parts(5, 10.0, 2.0),
            ),
            (
                "RETIRED_METRIC{REGION=x}".to_string(),
                Granularity::Hour,
                Baseline::from_parts(9, 1.0, 0.5),
            ),
        ]);
        assert_eq!(loaded, 1);
        assert_eq!(engine.baseline_count(), 1);
    }
}
