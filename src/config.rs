//! Daemon configuration. Every field has a working default, so a missing
//! or partial TOML file is fine.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::aggregate::{LatePolicy, ReducerKind};
use crate::metric::MetricName;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API bind address
    pub bind: String,
    /// SQLite path (dead letters, persisted baselines)
    pub db_path: String,
    pub sink: SinkConfig,
    pub pipeline: PipelineConfig,
    pub detect: DetectConfig,
    pub emit: EmitConfig,
    /// Per-metric reducer overrides; unlisted metrics use the built-in
    /// defaults (count for occurrence metrics, sum for SUMMARY_VALUE).
    pub reducers: HashMap<MetricName, ReducerKind>,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Downstream metrics store endpoint. When unset, records are logged
    /// instead of shipped -- useful for local runs.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ingest channel capacity (events)
    pub channel_capacity: usize,
    /// Sealed-record emit queue capacity
    pub queue_capacity: usize,
    /// How often the seal scheduler checks for due boundaries (seconds)
    pub seal_poll_secs: u64,
    /// How long sealing may stall on a saturated emit queue before the
    /// blocked record is dead-lettered (seconds)
    pub backpressure_wait_secs: u64,
    pub late_policy: LatePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    /// Observations required before a baseline may flag anomalies
    pub min_observations: u64,
    /// Deviation threshold in standard deviations
    pub sigma_threshold: f64,
    /// Persist baselines across restarts
    pub persist_baselines: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            db_path: "data/metricloom.db".to_string(),
            sink: SinkConfig::default(),
            pipeline: PipelineConfig::default(),
            detect: DetectConfig::default(),
            emit: EmitConfig::default(),
            reducers: HashMap::new(),
            log: LogConfig::default(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { endpoint: None }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            queue_capacity: 64,
            seal_poll_secs: 10,
            backpressure_wait_secs: 30,
            late_policy: LatePolicy::default(),
        }
    }
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            min_observations: 3,
            sigma_threshold: 3.0,
            persist_baselines: false,
        }
    }
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 500,
            max_backoff_secs: 30,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("reading config {}", p.display()))?;
                toml::from_str(&raw).with_context(|| format!("parsing config {}", p.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// The reducer a metric emits with, honoring overrides.
    pub fn reducer_for(&self, name: MetricName) -> ReducerKind {
        if let Some(kind) = self.reducers.get(&name) {
            return *kind;
        }
        match name {
            MetricName::SummaryValue => ReducerKind::Sum,
            _ => ReducerKind::Count,
        }
    }
}
