//! Concurrent tumbling-window store.
//!
//! Windows are keyed by (canonical identity, window start). Samples for the
//! same key are serialized by the map's per-entry locking; samples for
//! different keys proceed in parallel with no global lock. Sealing is driven
//! by the pipeline's clock, never by sample arrival.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::aggregate::{Granularity, LatePolicy, SampleStats, WindowState};
use crate::metric::MetricName;

type Key = (String, i64);

#[derive(Debug)]
struct OpenWindow {
    name: MetricName,
    stats: SampleStats,
}

impl OpenWindow {
    fn new(name: MetricName) -> Self {
        Self {
            name,
            stats: SampleStats::default(),
        }
    }
}

/// A window snapshot taken at seal time, retained until the sink
/// acknowledges delivery.
#[derive(Debug, Clone)]
pub struct SealedWindow {
    pub identity: String,
    pub name: MetricName,
    pub start: DateTime<Utc>,
    pub granularity: Granularity,
    pub stats: SampleStats,
    pub state: WindowState,
}

/// How a sample was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// Sample was for a sealed hour and was folded into the open window.
    LateMerged,
    /// Sample was for a sealed hour and the policy discarded it.
    LateDropped,
}

pub struct WindowStore {
    hourly: DashMap<Key, OpenWindow>,
    daily: DashMap<Key, OpenWindow>,
    late_policy: LatePolicy,
    /// Exclusive upper bound of sealed hourly time: hourly windows starting
    /// before this instant are sealed. Samples older than it are late.
    watermark_secs: AtomicI64,
}

impl WindowStore {
    pub fn new(late_policy: LatePolicy) -> Self {
        Self {
            hourly: DashMap::new(),
            daily: DashMap::new(),
            late_policy,
            watermark_secs: AtomicI64::new(i64::MIN),
        }
    }

    fn watermark(&self) -> i64 {
        self.watermark_secs.load(Ordering::Acquire)
    }

    /// Route one sample into its hourly window.
    pub fn record(
        &self,
        identity: &str,
        name: MetricName,
        ts: DateTime<Utc>,
        value: f64,
    ) -> RecordOutcome {
        let hour = Granularity::Hour.floor(ts).timestamp();
        let wm = self.watermark();

        let mut sample = SampleStats::default();
        sample.observe(value);

        if hour < wm {
            return match self.late_policy {
                LatePolicy::Drop => RecordOutcome::LateDropped,
                LatePolicy::MergeIntoNext => {
                    self.fold_at(identity, name, wm, sample);
                    RecordOutcome::LateMerged
                }
            };
        }

        self.fold_at(identity, name, hour, sample);
        RecordOutcome::Recorded
    }

    /// Fold stats into the hourly window starting at `hour`, chasing the
    /// watermark if a seal sweeps that hour mid-update. A sample that was on
    /// time when it arrived is never lost to the seal race: either the
    /// sealer's snapshot included it, or we pull the straggler entry back
    /// out and fold it into the next open window.
    fn fold_at(&self, identity: &str, name: MetricName, mut hour: i64, stats: SampleStats) {
        let mut pending = stats;
        loop {
            let key = (identity.to_string(), hour);
            {
                let mut w = self
                    .hourly
                    .entry(key.clone())
                    .or_insert_with(|| OpenWindow::new(name));
                w.stats.merge(&pending);
            }

            let wm = self.watermark();
            if hour >= wm {
                return;
            }
            match self.hourly.remove(&key) {
                Some((_, w)) => {
                    pending = w.stats;
                    hour = wm;
                }
                // Sealer already took the entry; the stats made the snapshot.
                None => return,
            }
        }
    }

    /// Seal every window whose end boundary has passed. Hourly windows are
    /// swept first and rolled into their daily window, so the last hour of a
    /// day is always in the daily state before the day itself seals.
    ///
    /// Returned windows are ordered by (identity, start), which preserves
    /// seal order per identity for the detector.
    pub fn seal_due(&self, now: DateTime<Utc>) -> Vec<SealedWindow> {
        self.seal_up_to(
            Granularity::Hour.floor(now).timestamp(),
            Granularity::Day.floor(now).timestamp(),
        )
    }

    /// Shutdown drain: force-seal every open window regardless of boundary.
    pub fn seal_all(&self) -> Vec<SealedWindow> {
        self.seal_up_to(i64::MAX, i64::MAX)
    }

    fn seal_up_to(&self, boundary_h: i64, boundary_d: i64) -> Vec<SealedWindow> {
        // Advance the watermark before sweeping so racing samples for swept
        // hours reroute forward instead of resurrecting sealed windows.
        self.watermark_secs.fetch_max(boundary_h, Ordering::AcqRel);

        let mut sealed = Vec::new();

        let due: Vec<Key> = self
            .hourly
            .iter()
            .filter(|e| e.key().1 < boundary_h)
            .map(|e| e.key().clone())
            .collect();
        for key in due {
            if let Some(((identity, start), w)) = self.hourly.remove(&key) {
                let start_dt = DateTime::from_timestamp(start, 0).unwrap_or_default();
                let day = Granularity::Day.floor(start_dt).timestamp();
                {
                    let mut d = self
                        .daily
                        .entry((identity.clone(), day))
                        .or_insert_with(|| OpenWindow::new(w.name));
                    d.stats.merge(&w.stats);
                }
                sealed.push(SealedWindow {
                    identity,
                    name: w.name,
                    start: start_dt,
                    granularity: Granularity::Hour,
                    stats: w.stats,
                    state: WindowState::Sealed,
                });
            }
        }

        let due_d: Vec<Key> = self
            .daily
            .iter()
            .filter(|e| e.key().1 < boundary_d)
            .map(|e| e.key().clone())
            .collect();
        for key in due_d {
            if let Some(((identity, start), w)) = self.daily.remove(&key) {
                sealed.push(SealedWindow {
                    identity,
                    name: w.name,
                    start: DateTime::from_timestamp(start, 0).unwrap_or_default(),
                    granularity: Granularity::Day,
                    stats: w.stats,
                    state: WindowState::Sealed,
                });
            }
        }

        sealed.sort_by(|a, b| a.identity.cmp(&b.identity).then(a.start.cmp(&b.start)));
        sealed
    }

    /// (open hourly, open daily) window counts, for the status endpoint.
    pub fn open_counts(&self) -> (usize, usize) {
        (self.hourly.len(), self.daily.len())
    }
}
