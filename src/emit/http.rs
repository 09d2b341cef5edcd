//! HTTP JSON sink adapter.

use async_trait::async_trait;
use serde_json::json;

use crate::emit::{EmitRecord, Sink, SinkError};

/// Posts each record as JSON to a single endpoint.
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn emit(&self, record: &EmitRecord) -> Result<(), SinkError> {
        let body = json!({
            "identity": record.identity,
            "value": record.value,
            "window_start": record.window_start.to_rfc3339(),
            "granularity": record.granularity.to_string(),
            "emitted_at": record.emitted_at.to_rfc3339(),
            "idempotency_key": record.idempotency_key(),
            "anomaly": record.anomaly,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        // Server-side trouble and throttling are worth retrying; anything
        // else means the record itself is unacceptable.
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(SinkError::Unavailable(format!("HTTP {status}")));
        }
        Err(SinkError::Rejected(format!("HTTP {status}")))
    }
}
