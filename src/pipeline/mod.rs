//! Pipeline coordinator.
//!
//! Wires ingestion -> canonicalization -> aggregation -> detection ->
//! emission. Three tasks cooperate: an ingest worker draining the event
//! channel into the window store, a seal scheduler driven by the clock, and
//! an emit worker consuming a bounded queue of sealed records. Ingestion and
//! sealing never block on a slow sink; a saturated emit queue stalls sealing
//! up to a configured wait and then dead-letters the blocked record.

pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregate::{RecordOutcome, SealedWindow, WindowStore};
use crate::config::Config;
use crate::detect::engine::AnomalyEngine;
use crate::emit::worker::{deliver, DeliveryOutcome, RetryPolicy};
use crate::emit::{AnomalyInfo, EmitRecord, Sink};
use crate::event::{Event, TaxonomyError};
use crate::metric::{canonicalize, CanonicalError, MetricName};
use crate::storage::{self, dead_letter, Pool};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    #[error("pipeline is not running")]
    NotRunning,

    #[error("pipeline is draining, event not accepted")]
    Draining,
}

/// Observable pipeline counters. Failures surface here and in the
/// dead-letter table; nothing unwinds the host process.
#[derive(Debug, Default)]
pub struct Counters {
    pub events_ingested: AtomicU64,
    pub late_merged: AtomicU64,
    pub late_dropped: AtomicU64,
    pub windows_sealed: AtomicU64,
    pub emissions_ok: AtomicU64,
    pub emission_retries: AtomicU64,
    pub dead_letters: AtomicU64,
    pub capacity_exceeded: AtomicU64,
    pub anomalies_flagged: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "events_ingested": self.events_ingested.load(Ordering::Relaxed),
            "late_merged": self.late_merged.load(Ordering::Relaxed),
            "late_dropped": self.late_dropped.load(Ordering::Relaxed),
            "windows_sealed": self.windows_sealed.load(Ordering::Relaxed),
            "emissions_ok": self.emissions_ok.load(Ordering::Relaxed),
            "emission_retries": self.emission_retries.load(Ordering::Relaxed),
            "dead_letters": self.dead_letters.load(Ordering::Relaxed),
            "capacity_exceeded": self.capacity_exceeded.load(Ordering::Relaxed),
            "anomalies_flagged": self.anomalies_flagged.load(Ordering::Relaxed),
        })
    }
}

/// A canonicalized sample on its way to the window store.
struct Sample {
    identity: String,
    name: MetricName,
    timestamp: DateTime<Utc>,
    value: f64,
}

struct Running {
    event_tx: mpsc::Sender<Sample>,
    queue_tx: mpsc::Sender<EmitRecord>,
    shutdown_tx: watch::Sender<bool>,
    ingest: JoinHandle<()>,
    sealer: JoinHandle<()>,
    emitter: JoinHandle<()>,
}

/// State shared between the coordinator and its spawned tasks.
struct Core {
    config: Config,
    store: WindowStore,
    detector: AnomalyEngine,
    counters: Counters,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn Sink>,
    pool: Pool,
}

pub struct Pipeline {
    core: Arc<Core>,
    running: Mutex<Option<Running>>,
}

impl Pipeline {
    pub fn new(config: Config, sink: Arc<dyn Sink>, clock: Arc<dyn Clock>, pool: Pool) -> Self {
        let store = WindowStore::new(config.pipeline.late_policy);
        let detector = AnomalyEngine::new(
            config.detect.min_observations,
            config.detect.sigma_threshold,
        );
        Self {
            core: Arc::new(Core {
                config,
                store,
                detector,
                counters: Counters::default(),
                clock,
                sink,
                pool,
            }),
            running: Mutex::new(None),
        }
    }

    /// Start the pipeline tasks. Idempotent: calling start on a pipeline
    /// that is already running is a logged no-op.
    pub fn start(&self) -> anyhow::Result<()> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            info!("pipeline already running, start ignored");
            return Ok(());
        }

        let core = &self.core;
        if core.config.detect.persist_baselines {
            let entries = storage::load_baselines(&core.pool)?;
            let loaded = core.detector.restore(entries);
            info!(loaded, "restored persisted baselines");
        }

        let (event_tx, event_rx) = mpsc::channel(core.config.pipeline.channel_capacity.max(1));
        let (queue_tx, queue_rx) = mpsc::channel(core.config.pipeline.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let ingest = tokio::spawn(Arc::clone(core).run_ingest(event_rx));
        let sealer = tokio::spawn(Arc::clone(core).run_sealer(queue_tx.clone(), shutdown_rx));
        let emitter = tokio::spawn(Arc::clone(core).run_emitter(queue_rx));

        *running = Some(Running {
            event_tx,
            queue_tx,
            shutdown_tx,
            ingest,
            sealer,
            emitter,
        });
        info!("pipeline started");
        Ok(())
    }

    /// Validate, canonicalize, and enqueue one event. Returns as soon as the
    /// sample is queued; only taxonomy/canonicalization problems fail
    /// synchronously.
    pub async fn submit(&self, event: Event) -> Result<(), PipelineError> {
        let event_tx = {
            let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            match running.as_ref() {
                Some(r) => r.event_tx.clone(),
                None => return Err(PipelineError::NotRunning),
            }
        };

        let name = event.id.metric_name();
        let identity = canonicalize(name, &event.criteria)?;
        let sample = Sample {
            identity,
            name,
            timestamp: event.timestamp,
            value: event.sample_value(),
        };
        event_tx
            .send(sample)
            .await
            .map_err(|_| PipelineError::Draining)?;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn counters(&self) -> &Counters {
        &self.core.counters
    }

    /// Status summary for the API.
    pub fn status(&self) -> serde_json::Value {
        let (open_hourly, open_daily) = self.core.store.open_counts();
        serde_json::json!({
            "running": self.is_running(),
            "open_windows": { "hourly": open_hourly, "daily": open_daily },
            "baselines": self.core.detector.baseline_count(),
            "counters": self.core.counters.snapshot(),
        })
    }

    /// Drain and stop. Open windows are force-sealed, sealed records get a
    /// final bounded emission attempt, and whatever cannot be delivered is
    /// dead-lettered and logged as a gap. Idempotent once stopped.
    pub async fn shutdown(&self) {
        let running = {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            match running.take() {
                Some(r) => r,
                None => return,
            }
        };
        info!("pipeline shutting down, draining");
        let core = &self.core;

        // Stop accepting events; the ingest worker drains what is queued.
        drop(running.event_tx);
        let _ = running.ingest.await;

        // Stop the boundary scheduler, then force-seal everything open.
        let _ = running.shutdown_tx.send(true);
        let _ = running.sealer.await;

        let sealed = core.store.seal_all();
        let gap_wait = Duration::from_secs(5);
        for window in sealed {
            core.process_sealed(window, &running.queue_tx, gap_wait).await;
        }

        // Close the queue; the emitter flushes the backlog and exits.
        drop(running.queue_tx);
        let _ = running.emitter.await;

        if core.config.detect.persist_baselines {
            let snapshot = core.detector.snapshot();
            if let Err(e) = storage::save_baselines(&core.pool, &snapshot) {
                error!("failed to persist baselines: {e:#}");
            }
        }

        let gaps = core.counters.dead_letters.load(Ordering::Relaxed)
            + core.counters.capacity_exceeded.load(Ordering::Relaxed);
        if gaps > 0 {
            warn!(gaps, "pipeline drained with delivery gaps (see dead_letters table)");
        } else {
            info!("pipeline drained clean");
        }
    }
}

impl Core {
    async fn run_ingest(self: Arc<Self>, mut event_rx: mpsc::Receiver<Sample>) {
        while let Some(sample) = event_rx.recv().await {
            match self.store.record(
                &sample.identity,
                sample.name,
                sample.timestamp,
                sample.value,
            ) {
                RecordOutcome::Recorded => {
                    self.counters.events_ingested.fetch_add(1, Ordering::Relaxed);
                }
                RecordOutcome::LateMerged => {
                    self.counters.events_ingested.fetch_add(1, Ordering::Relaxed);
                    self.counters.late_merged.fetch_add(1, Ordering::Relaxed);
                    debug!(identity = %sample.identity, "late sample merged into open window");
                }
                RecordOutcome::LateDropped => {
                    self.counters.late_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        identity = %sample.identity,
                        timestamp = %sample.timestamp,
                        "late sample dropped by policy"
                    );
                }
            }
        }
        debug!("ingest worker finished");
    }

    async fn run_sealer(
        self: Arc<Self>,
        queue_tx: mpsc::Sender<EmitRecord>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let poll = Duration::from_secs(self.config.pipeline.seal_poll_secs.max(1));
        let wait = Duration::from_secs(self.config.pipeline.backpressure_wait_secs);
        let mut interval = tokio::time::interval(poll);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = self.clock.now();
                    for window in self.store.seal_due(now) {
                        self.process_sealed(window, &queue_tx, wait).await;
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        debug!("seal scheduler finished");
    }

    /// Classify a sealed window and hand it (plus any anomaly notice) to the
    /// emit queue, honoring backpressure.
    async fn process_sealed(
        &self,
        window: SealedWindow,
        queue_tx: &mpsc::Sender<EmitRecord>,
        wait: Duration,
    ) {
        self.counters.windows_sealed.fetch_add(1, Ordering::Relaxed);

        let value = window.stats.value(self.config.reducer_for(window.name));
        let anomaly = self.detector.observe(&window, value);

        let record = EmitRecord {
            identity: window.identity.clone(),
            value,
            window_start: window.start,
            granularity: window.granularity,
            emitted_at: self.clock.now(),
            anomaly: None,
        };

        if let Some(a) = &anomaly {
            self.counters.anomalies_flagged.fetch_add(1, Ordering::Relaxed);
            warn!(
                identity = %a.identity,
                value = a.value,
                baseline_mean = a.baseline_mean,
                deviation_sigma = a.deviation_sigma,
                "statistically notable window"
            );
        }

        let notice = anomaly.map(|a| EmitRecord {
            anomaly: Some(AnomalyInfo {
                deviation_sigma: a.deviation_sigma,
                baseline_mean: a.baseline_mean,
            }),
            ..record.clone()
        });

        self.enqueue(record, queue_tx, wait).await;
        if let Some(notice) = notice {
            self.enqueue(notice, queue_tx, wait).await;
        }
    }

    async fn enqueue(
        &self,
        record: EmitRecord,
        queue_tx: &mpsc::Sender<EmitRecord>,
        wait: Duration,
    ) {
        match queue_tx.send_timeout(record, wait).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(record)) => {
                self.counters.capacity_exceeded.fetch_add(1, Ordering::Relaxed);
                error!(
                    identity = %record.identity,
                    "emit queue saturated beyond backpressure limit, dead-lettering"
                );
                self.dead_letter(&record, "capacity exceeded");
            }
            Err(SendTimeoutError::Closed(record)) => {
                self.dead_letter(&record, "emit queue closed");
            }
        }
    }

    async fn run_emitter(self: Arc<Self>, mut queue_rx: mpsc::Receiver<EmitRecord>) {
        let policy = RetryPolicy {
            max_attempts: self.config.emit.max_attempts,
            base_backoff: Duration::from_millis(self.config.emit.base_backoff_ms),
            max_backoff: Duration::from_secs(self.config.emit.max_backoff_secs),
        };

        while let Some(mut record) = queue_rx.recv().await {
            record.emitted_at = self.clock.now();
            match deliver(self.sink.as_ref(), &record, &policy).await {
                DeliveryOutcome::Delivered { attempts } => {
                    self.counters.emissions_ok.fetch_add(1, Ordering::Relaxed);
                    if attempts > 1 {
                        self.counters
                            .emission_retries
                            .fetch_add((attempts - 1) as u64, Ordering::Relaxed);
                    }
                    debug!(key = %record.idempotency_key(), "window emitted");
                }
                DeliveryOutcome::Exhausted { attempts, last_error } => {
                    error!(
                        identity = %record.identity,
                        attempts,
                        "emission exhausted retries: {last_error}"
                    );
                    self.dead_letter(&record, &last_error.to_string());
                }
                DeliveryOutcome::Rejected { error } => {
                    error!(identity = %record.identity, "emission rejected: {error}");
                    self.dead_letter(&record, &error.to_string());
                }
            }
        }
        debug!("emit worker finished");
    }

    fn dead_letter(&self, record: &EmitRecord, reason: &str) {
        self.counters.dead_letters.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = dead_letter::record(&self.pool, record, reason) {
            // Last resort: the record survives only in the log line.
            error!(
                identity = %record.identity,
                window_start = %record.window_start,
                value = record.value,
                "failed to write dead letter ({reason}): {e:#}"
            );
        }
    }
}
