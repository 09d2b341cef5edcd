//! Tumbling-window aggregation keyed by canonical metric identity.

pub mod reducer;
pub mod store;

pub use reducer::{ReducerKind, SampleStats};
pub use store::{RecordOutcome, SealedWindow, WindowStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Window granularity. Daily windows are rollups of sealed hourly windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    pub fn span_secs(&self) -> i64 {
        match self {
            Granularity::Hour => 3_600,
            Granularity::Day => 86_400,
        }
    }

    /// Wall-clock aligned window start containing `ts`.
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let span = self.span_secs();
        let floored = secs - secs.rem_euclid(span);
        DateTime::from_timestamp(floored, 0).unwrap_or(ts)
    }

    pub fn end_of(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start + chrono::Duration::seconds(self.span_secs())
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Granularity::Hour => write!(f, "hour"),
            Granularity::Day => write!(f, "day"),
        }
    }
}

/// Per-window lifecycle. A window accepts samples only while `Open`;
/// `Sealed -> Emitted` happens once the sink acknowledges delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowState {
    Open,
    Sealed,
    Emitted,
}

/// What to do with a sample that arrives for an already-sealed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatePolicy {
    /// Fold the sample into the next open window (default).
    MergeIntoNext,
    /// Discard the sample and surface a late-sample notice.
    Drop,
}

impl Default for LatePolicy {
    fn default() -> Self {
        LatePolicy::MergeIntoNext
    }
}
