//! Full-pipeline scenarios driven by a manual clock and fake sinks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use metricloom::config::Config;
use metricloom::emit::{EmitRecord, Sink, SinkError};
use metricloom::event::{CriteriaKind, Event, EventId, Subject};
use metricloom::pipeline::{ManualClock, Pipeline};
use metricloom::storage;

/// Records every successful emission.
#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<EmitRecord>>,
}

#[async_trait]
impl Sink for RecordingSink {
    async fn emit(&self, record: &EmitRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

impl RecordingSink {
    fn records(&self) -> Vec<EmitRecord> {
        self.records.lock().unwrap().clone()
    }
}

/// Idempotent downstream store: upserts by idempotency key, counts writes.
#[derive(Default)]
struct IdempotentStore {
    by_key: Mutex<HashMap<String, f64>>,
    failures_remaining: AtomicU32,
}

#[async_trait]
impl Sink for IdempotentStore {
    async fn emit(&self, record: &EmitRecord) -> Result<(), SinkError> {
        if self.failures_remaining.load(Ordering::SeqCst) > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(SinkError::Unavailable("simulated outage".into()));
        }
        self.by_key
            .lock()
            .unwrap()
            .insert(record.idempotency_key(), record.value);
        Ok(())
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.pipeline.seal_poll_secs = 1;
    config.pipeline.backpressure_wait_secs = 5;
    config.emit.base_backoff_ms = 1;
    config.emit.max_backoff_secs = 1;
    config
}

fn start_of(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
}

fn connection_event(ts: DateTime<Utc>) -> Event {
    Event::new(
        EventId::ConnectionOpened,
        ts,
        Subject {
            object_id: "conn-1".into(),
            object_type: "connection".into(),
        },
    )
    .with_criteria(CriteriaKind::Region, "us-east")
    .with_criteria(CriteriaKind::ProviderType, "aws")
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_five_events_one_hourly_window() {
    let sink = Arc::new(RecordingSink::default());
    let clock = Arc::new(ManualClock::new(start_of(2025, 3, 14, 10)));
    let pool = storage::open_memory_pool().unwrap();
    let pipeline = Arc::new(Pipeline::new(
        test_config(),
        sink.clone(),
        clock.clone(),
        pool,
    ));
    pipeline.start().unwrap();

    for m in 0..5 {
        let ts = start_of(2025, 3, 14, 10) + chrono::Duration::minutes(m * 7);
        pipeline.submit(connection_event(ts)).await.unwrap();
    }
    let counters = pipeline.counters();
    wait_for("ingest", || {
        counters.events_ingested.load(Ordering::Relaxed) == 5
    })
    .await;

    clock.set(start_of(2025, 3, 14, 11) + chrono::Duration::seconds(1));
    wait_for("seal", || !sink.records().is_empty()).await;

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert_eq!(
        rec.identity,
        "CONNECTION_COUNT{PROVIDER_TYPE=aws,REGION=us-east}"
    );
    assert_eq!(rec.value, 5.0);
    assert_eq!(rec.window_start, start_of(2025, 3, 14, 10));
    assert!(rec.anomaly.is_none());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_anomalous_window_flagged_after_warm_up() {
    let sink = Arc::new(RecordingSink::default());
    let clock = Arc::new(ManualClock::new(start_of(2025, 3, 14, 0)));
    let pool = storage::open_memory_pool().unwrap();
    let pipeline = Arc::new(Pipeline::new(
        test_config(),
        sink.clone(),
        clock.clone(),
        pool,
    ));
    pipeline.start().unwrap();

    // Warm-up baseline [10, 11, 12], then [10, 12, 11, 100]
    let hourly_counts: [u32; 7] = [10, 11, 12, 10, 12, 11, 100];
    let counters = pipeline.counters();
    let mut submitted = 0u64;
    for (hour, count) in hourly_counts.iter().enumerate() {
        let hour_start = start_of(2025, 3, 14, hour as u32);
        for i in 0..*count {
            let ts = hour_start + chrono::Duration::seconds(i as i64);
            pipeline.submit(connection_event(ts)).await.unwrap();
            submitted += 1;
        }
        wait_for("ingest", || {
            counters.events_ingested.load(Ordering::Relaxed) == submitted
        })
        .await;

        let sealed_before = counters.windows_sealed.load(Ordering::Relaxed);
        clock.set(start_of(2025, 3, 14, hour as u32 + 1) + chrono::Duration::seconds(1));
        wait_for("seal", || {
            counters.windows_sealed.load(Ordering::Relaxed) > sealed_before
        })
        .await;
    }

    wait_for("emissions", || sink.records().len() >= 8).await;
    let records = sink.records();

    // 7 hourly aggregates plus exactly one anomaly notice
    let aggregates: Vec<_> = records.iter().filter(|r| r.anomaly.is_none()).collect();
    let notices: Vec<_> = records.iter().filter(|r| r.anomaly.is_some()).collect();
    assert_eq!(aggregates.len(), 7);
    assert_eq!(notices.len(), 1);

    let notice = notices[0];
    assert_eq!(notice.value, 100.0);
    assert_eq!(notice.window_start, start_of(2025, 3, 14, 6));
    let info = notice.anomaly.as_ref().unwrap();
    assert!(info.deviation_sigma > 3.0);
    assert_eq!(counters.anomalies_flagged.load(Ordering::Relaxed), 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_flaky_sink_retries_to_single_emission() {
    let sink = Arc::new(IdempotentStore {
        by_key: Mutex::new(HashMap::new()),
        failures_remaining: AtomicU32::new(3),
    });
    let clock = Arc::new(ManualClock::new(start_of(2025, 3, 14, 10)));
    let pool = storage::open_memory_pool().unwrap();
    let pipeline = Arc::new(Pipeline::new(
        test_config(),
        sink.clone(),
        clock.clone(),
        pool.clone(),
    ));
    pipeline.start().unwrap();

    for m in 0..4 {
        let ts = start_of(2025, 3, 14, 10) + chrono::Duration::minutes(m);
        pipeline.submit(connection_event(ts)).await.unwrap();
    }
    let counters = pipeline.counters();
    wait_for("ingest", || {
        counters.events_ingested.load(Ordering::Relaxed) == 4
    })
    .await;

    clock.set(start_of(2025, 3, 14, 11) + chrono::Duration::seconds(1));
    wait_for("delivery", || {
        counters.emissions_ok.load(Ordering::Relaxed) == 1
    })
    .await;

    let stored = sink.by_key.lock().unwrap().clone();
    assert_eq!(stored.len(), 1);
    let value = stored
        .get("CONNECTION_COUNT{PROVIDER_TYPE=aws,REGION=us-east}|2025-03-14T10:00:00+00:00|hour")
        .copied();
    assert_eq!(value, Some(4.0));

    assert_eq!(counters.emission_retries.load(Ordering::Relaxed), 3);
    assert_eq!(counters.dead_letters.load(Ordering::Relaxed), 0);
    assert_eq!(storage::dead_letter::count(&pool).unwrap(), 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent_downstream() {
    use metricloom::aggregate::Granularity;
    use metricloom::emit::worker::{deliver, RetryPolicy};

    let store = IdempotentStore::default();
    let record = EmitRecord {
        identity: "USER_COUNT".into(),
        value: 9.0,
        window_start: start_of(2025, 3, 14, 10),
        granularity: Granularity::Hour,
        emitted_at: start_of(2025, 3, 14, 11),
        anomaly: None,
    };

    let policy = RetryPolicy::default();
    for _ in 0..2 {
        let outcome = deliver(&store, &record, &policy).await;
        assert!(matches!(
            outcome,
            metricloom::emit::worker::DeliveryOutcome::Delivered { .. }
        ));
    }

    let stored = store.by_key.lock().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored.get(&record.idempotency_key()).copied(), Some(9.0));
}

#[tokio::test]
async fn test_start_is_idempotent_and_shutdown_drains() {
    let sink = Arc::new(RecordingSink::default());
    let clock = Arc::new(ManualClock::new(start_of(2025, 3, 14, 10)));
    let pool = storage::open_memory_pool().unwrap();
    let pipeline = Arc::new(Pipeline::new(
        test_config(),
        sink.clone(),
        clock.clone(),
        pool,
    ));
    pipeline.start().unwrap();
    // Second start while running is a no-op, not an error
    pipeline.start().unwrap();
    assert!(pipeline.is_running());

    pipeline
        .submit(connection_event(start_of(2025, 3, 14, 10)))
        .await
        .unwrap();
    let counters = pipeline.counters();
    wait_for("ingest", || {
        counters.events_ingested.load(Ordering::Relaxed) == 1
    })
    .await;

    // No boundary has passed; shutdown must force-seal and flush.
    pipeline.shutdown().await;
    assert!(!pipeline.is_running());

    let records = sink.records();
    // force-sealed hourly window plus its daily rollup
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.identity == "CONNECTION_COUNT{PROVIDER_TYPE=aws,REGION=us-east}"));

    // Submitting after shutdown is a clean error
    let err = pipeline
        .submit(connection_event(start_of(2025, 3, 14, 10)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not running"));
}
