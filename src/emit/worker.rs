//! Retry policy and bounded delivery.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::emit::{EmitRecord, Sink, SinkError};

/// Exponential backoff with jitter, bounded attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), with up to 50%
    /// uniform jitter so stalled sinks don't see synchronized retries.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.max_backoff);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2);
        capped + Duration::from_millis(jitter_ms)
    }
}

/// Terminal result of delivering one record.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// All attempts saw a transient failure; caller dead-letters.
    Exhausted { attempts: u32, last_error: SinkError },
    /// The sink rejected the record outright; caller dead-letters.
    Rejected { error: SinkError },
}

/// Drive one record through the sink with bounded retries.
///
/// Only transient [`SinkError::Unavailable`] failures are retried;
/// rejections are terminal on the first response.
pub async fn deliver(sink: &dyn Sink, record: &EmitRecord, policy: &RetryPolicy) -> DeliveryOutcome {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match sink.emit(record).await {
            Ok(()) => return DeliveryOutcome::Delivered { attempts: attempt },
            Err(err @ SinkError::Rejected(_)) => {
                return DeliveryOutcome::Rejected { error: err };
            }
            Err(err @ SinkError::Unavailable(_)) => {
                if attempt >= policy.max_attempts {
                    return DeliveryOutcome::Exhausted {
                        attempts: attempt,
                        last_error: err,
                    };
                }
                let delay = policy.backoff(attempt);
                warn!(
                    identity = %record.identity,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "sink unavailable, backing off: {err}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Granularity;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySink {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Sink for FlakySink {
        async fn emit(&self, _record: &EmitRecord) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(SinkError::Unavailable("connection refused".into()));
            }
            Ok(())
        }
    }

    fn record() -> EmitRecord {
        EmitRecord {
            identity: "CONNECTION_COUNT".into(),
            value: 5.0,
            window_start: Utc::now(),
            granularity: Granularity::Hour,
            emitted_at: Utc::now(),
            anomaly: None,
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_retries_through_transient_failures() {
        let sink = FlakySink {
            failures: AtomicU32::new(3),
            calls: AtomicU32::new(0),
        };
        let outcome = deliver(&sink, &record(), &fast_policy(5)).await;
        assert!(matches!(outcome, DeliveryOutcome::Delivered { attempts: 4 }));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exhausts_bounded_attempts() {
        let sink = FlakySink {
            failures: AtomicU32::new(100),
            calls: AtomicU32::new(0),
        };
        let outcome = deliver(&sink, &record(), &fast_policy(3)).await;
        assert!(matches!(outcome, DeliveryOutcome::Exhausted { attempts: 3, .. }));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejection_is_terminal() {
        struct RejectingSink;
        #[async_trait]
        impl Sink for RejectingSink {
            async fn emit(&self, _record: &EmitRecord) -> Result<(), SinkError> {
                Err(SinkError::Rejected("HTTP 400".into()))
            }
        }
        let outcome = deliver(&RejectingSink, &record(), &fast_policy(5)).await;
        assert!(matches!(outcome, DeliveryOutcome::Rejected { .. }));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
        };
        // cap of 8s plus at most 50% jitter
        assert!(policy.backoff(30) <= Duration::from_secs(12));
    }
}
