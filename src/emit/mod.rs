//! Delivery of sealed aggregates to the downstream metrics store.

pub mod http;
pub mod worker;

pub use http::HttpSink;
pub use worker::{deliver, DeliveryOutcome, RetryPolicy};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::aggregate::Granularity;

#[derive(Debug, Error)]
pub enum SinkError {
    /// Transient failure; the worker retries with backoff.
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// Permanent rejection; retrying cannot help, dead-letter immediately.
    #[error("sink rejected record: {0}")]
    Rejected(String),
}

/// Anomaly annotation carried alongside a flagged aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyInfo {
    pub deviation_sigma: f64,
    pub baseline_mean: f64,
}

/// One record bound for the downstream store.
#[derive(Debug, Clone, Serialize)]
pub struct EmitRecord {
    pub identity: String,
    pub value: f64,
    pub window_start: DateTime<Utc>,
    pub granularity: Granularity,
    pub emitted_at: DateTime<Utc>,
    pub anomaly: Option<AnomalyInfo>,
}

impl EmitRecord {
    /// Idempotency key: (identity, window start, granularity).
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.identity,
            self.window_start.to_rfc3339(),
            self.granularity
        )
    }
}

/// Logs records instead of shipping them. Default sink when no endpoint is
/// configured; handy for local runs.
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn emit(&self, record: &EmitRecord) -> Result<(), SinkError> {
        tracing::info!(
            identity = %record.identity,
            value = record.value,
            window_start = %record.window_start,
            granularity = %record.granularity,
            anomaly = record.anomaly.is_some(),
            "emit (log sink)"
        );
        Ok(())
    }
}

/// A downstream metrics store adapter.
///
/// Delivery is at-least-once: the same (identity, window start, granularity)
/// record may arrive more than once, and implementations of the downstream
/// store MUST upsert idempotently by [`EmitRecord::idempotency_key`]. That
/// contract belongs to the external store; this trait can only document it.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn emit(&self, record: &EmitRecord) -> Result<(), SinkError>;
}
