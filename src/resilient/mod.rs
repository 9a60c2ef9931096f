//! Resilient document insertion.
//!
//! Inserts documents one at a time through a [`DocumentSink`], retrying
//! transient failures with exponential backoff and pausing behind a
//! [`CircuitBreaker`] when the service keeps failing. Every run yields
//! [`InsertMetrics`] and a Request Unit [`CostEstimate`].
//!
//! ```text
//!  doc ──► breaker open? ──yes──► wait cooldown ──► half-open trial
//!              │ no
//!              ▼
//!          sink.insert ──ok──► record RU + latency
//!              │ err
//!              ├─ duplicate key on a retry ──► earlier attempt landed, count success
//!              ├─ permanent ──► count failure
//!              └─ transient ──► breaker failure, sleep max(backoff, retry-after), retry
//! ```

pub mod circuit_breaker;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use metrics::InsertMetrics;

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::cost_tracker::{RequestUnitPricing, DEFAULT_RU_PRICE_PER_MILLION};
use crate::documents::{document_label, with_document_id, JsonDocument};
use crate::error::{Result, VectorSearchError};

/// Tuning for [`ResilientInserter`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceConfig {
    /// Retries per document after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Consecutive retryable failures that open the circuit.
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub request_unit_price_per_million: f64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            request_unit_price_per_million: DEFAULT_RU_PRICE_PER_MILLION,
        }
    }
}

impl ResilienceConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
        }
    }
}

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based):
    /// `base * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}

/// Result of one successful insert.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InsertReceipt {
    /// Request Units charged, when the service reports them.
    pub request_charge: Option<f64>,
}

/// Destination for single-document inserts.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn insert(&self, document: &JsonDocument) -> Result<InsertReceipt>;
}

/// Request Unit cost of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub total_request_units: f64,
    /// Inserts the average is taken over.
    pub charged_inserts: usize,
    /// Average RU per insert that reported a charge.
    pub avg_request_units: f64,
    /// Serverless cost of the run in USD.
    pub serverless_cost: f64,
    pricing: RequestUnitPricing,
}

impl CostEstimate {
    pub fn from_metrics(metrics: &InsertMetrics, price_per_million: f64) -> Self {
        let pricing = RequestUnitPricing::new(price_per_million);
        let avg_request_units = if metrics.charged == 0 {
            0.0
        } else {
            metrics.total_request_units / metrics.charged as f64
        };
        Self {
            total_request_units: metrics.total_request_units,
            charged_inserts: metrics.charged,
            avg_request_units,
            serverless_cost: pricing.calculate_cost(metrics.total_request_units),
            pricing,
        }
    }

    /// Whether any insert reported its Request Unit charge.
    pub fn is_measured(&self) -> bool {
        self.charged_inserts > 0
    }

    /// Serverless cost of inserting `documents` documents at the observed
    /// average RU.
    pub fn project(&self, documents: u64) -> f64 {
        self.pricing
            .calculate_cost(self.avg_request_units * documents as f64)
    }
}

/// Outcome of [`ResilientInserter::insert_all`].
#[derive(Debug, Clone)]
pub struct InsertReport {
    pub metrics: InsertMetrics,
    pub cost: CostEstimate,
}

/// One-document-at-a-time inserter with retries and a circuit breaker.
pub struct ResilientInserter<S> {
    sink: S,
    config: ResilienceConfig,
    breaker: CircuitBreaker,
}

impl<S: DocumentSink> ResilientInserter<S> {
    pub fn new(sink: S, config: ResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(config.failure_threshold, config.cooldown);
        Self {
            sink,
            config,
            breaker,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Insert every document, returning metrics and a cost estimate.
    pub async fn insert_all(&mut self, documents: &[JsonDocument]) -> InsertReport {
        let mut metrics = InsertMetrics {
            documents: documents.len(),
            ..Default::default()
        };

        for (i, document) in documents.iter().enumerate() {
            self.insert_one(document, &mut metrics).await;
            if (i + 1) % 100 == 0 {
                info!(
                    "Progress: {}/{} ({} inserted, {} failed)",
                    i + 1,
                    documents.len(),
                    metrics.inserted,
                    metrics.failed
                );
            }
        }

        let cost = CostEstimate::from_metrics(&metrics, self.config.request_unit_price_per_million);
        InsertReport { metrics, cost }
    }

    async fn insert_one(&mut self, document: &JsonDocument, metrics: &mut InsertMetrics) {
        let backoff = self.config.backoff();
        let mut retries = 0;
        // one primary key for every attempt
        let document = &with_document_id(document);

        loop {
            if let Err(remaining) = self.breaker.check() {
                info!("Circuit open, waiting {:?} before trial insert", remaining);
                sleep(remaining).await;
                continue;
            }

            let started = Instant::now();
            match self.sink.insert(document).await {
                Ok(receipt) => {
                    self.breaker.record_success();
                    metrics.record_success(started.elapsed(), receipt.request_charge);
                    return;
                }
                Err(VectorSearchError::DuplicateKey(_)) if retries > 0 => {
                    debug!(
                        document = %document_label(document),
                        "Duplicate key on retry, earlier attempt was written"
                    );
                    self.breaker.record_success();
                    metrics.record_success(started.elapsed(), None);
                    metrics.already_written += 1;
                    return;
                }
                Err(e) if !e.is_recoverable() => {
                    debug!(
                        document = %document_label(document),
                        error = %e,
                        "Permanent insert failure"
                    );
                    metrics.record_failure(&e);
                    return;
                }
                Err(e) => {
                    metrics.record_retryable(&e);
                    if self.breaker.record_failure() {
                        metrics.circuit_opens += 1;
                        warn!(
                            "Circuit opened after {} consecutive failures",
                            self.breaker.consecutive_failures()
                        );
                    }

                    if retries >= self.config.max_retries {
                        warn!(
                            document = %document_label(document),
                            "Giving up after {} retries: {}",
                            retries,
                            e
                        );
                        metrics.record_failure(&e);
                        return;
                    }

                    retries += 1;
                    metrics.retries += 1;
                    let delay = retry_delay(&backoff, retries, &e);
                    debug!("Retry {} in {:?}: {}", retries, delay, e);
                    sleep(delay).await;
                }
            }
        }
    }
}

fn retry_delay(backoff: &BackoffPolicy, attempt: u32, error: &VectorSearchError) -> Duration {
    let delay = backoff.delay(attempt);
    error.retry_after().map_or(delay, |hint| hint.max(delay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays `outcomes`, then succeeds; records the `_id` of every attempt.
    struct RecordingSink {
        outcomes: Mutex<VecDeque<Result<InsertReceipt>>>,
        ids: Mutex<Vec<Value>>,
    }

    impl RecordingSink {
        fn new(outcomes: Vec<Result<InsertReceipt>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                ids: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DocumentSink for RecordingSink {
        async fn insert(&self, document: &JsonDocument) -> Result<InsertReceipt> {
            let id = document.get("_id").cloned().unwrap_or(Value::Null);
            self.ids.lock().unwrap().push(id);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(InsertReceipt::default()))
        }
    }

    fn hotel_without_id() -> JsonDocument {
        json!({"HotelName": "Harbor Inn"}).as_object().cloned().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_reuse_one_id() {
        let sink = RecordingSink::new(vec![
            Err(VectorSearchError::Timeout),
            Err(VectorSearchError::NetworkError("reset".to_string())),
        ]);
        let mut inserter = ResilientInserter::new(sink, ResilienceConfig::default());

        let report = inserter.insert_all(&[hotel_without_id()]).await;

        assert_eq!(report.metrics.inserted, 1);
        let ids = inserter.sink().ids.lock().unwrap().clone();
        assert_eq!(ids.len(), 3);
        assert!(ids[0].is_string());
        assert!(ids.iter().all(|id| *id == ids[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_after_lost_reply_counts_as_written() {
        let sink = RecordingSink::new(vec![
            Err(VectorSearchError::Timeout),
            Err(VectorSearchError::DuplicateKey("E11000".to_string())),
        ]);
        let mut inserter = ResilientInserter::new(sink, ResilienceConfig::default());

        let report = inserter.insert_all(&[hotel_without_id()]).await;

        assert_eq!(report.metrics.inserted, 1);
        assert_eq!(report.metrics.failed, 0);
        assert_eq!(report.metrics.already_written, 1);
        assert_eq!(report.metrics.charged, 0);
        assert_eq!(inserter.breaker().consecutive_failures(), 0);
    }

    #[test]
    fn test_default_config() {
        let config = ResilienceConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.cooldown, Duration::from_secs(60));
        assert_eq!(config.request_unit_price_per_million, 0.25);
    }

    #[test]
    fn test_backoff_schedule() {
        let backoff = ResilienceConfig::default().backoff();
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(6), Duration::from_secs(30));
        assert_eq!(backoff.delay(200), Duration::from_secs(30));
    }

    #[test]
    fn test_retry_after_hint_stretches_delay() {
        let backoff = ResilienceConfig::default().backoff();
        let throttled = VectorSearchError::Throttled {
            message: "16500".to_string(),
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(retry_delay(&backoff, 1, &throttled), Duration::from_secs(7));
        assert_eq!(retry_delay(&backoff, 4, &throttled), Duration::from_secs(8));
    }

    #[test]
    fn test_cost_estimate() {
        let metrics = InsertMetrics {
            documents: 4,
            inserted: 4,
            charged: 4,
            total_request_units: 40.0,
            ..Default::default()
        };
        let cost = CostEstimate::from_metrics(&metrics, 0.25);
        assert!(cost.is_measured());
        assert_eq!(cost.avg_request_units, 10.0);
        assert!((cost.serverless_cost - 0.00001).abs() < 1e-12);
        // 1M documents at 10 RU each
        assert!((cost.project(1_000_000) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_cost_estimate_without_inserts() {
        let cost = CostEstimate::from_metrics(&InsertMetrics::default(), 0.25);
        assert!(!cost.is_measured());
        assert_eq!(cost.avg_request_units, 0.0);
        assert_eq!(cost.project(1_000), 0.0);
    }

    #[test]
    fn test_average_skips_unreported_charges() {
        let mut metrics = InsertMetrics {
            documents: 4,
            ..Default::default()
        };
        for charge in [Some(10.0), None, Some(10.0), None] {
            metrics.record_success(Duration::from_millis(5), charge);
        }

        let cost = CostEstimate::from_metrics(&metrics, 0.25);
        assert_eq!(metrics.inserted, 4);
        assert_eq!(cost.charged_inserts, 2);
        assert_eq!(cost.avg_request_units, 10.0);
        assert!((cost.project(1_000_000) - 2.5).abs() < 1e-9);
    }
}
