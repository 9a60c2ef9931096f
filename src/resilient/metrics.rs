//! Insert metrics collected by the resilient inserter.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::VectorSearchError;

/// Counters for one `insert_all` run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertMetrics {
    /// Documents attempted.
    pub documents: usize,
    pub inserted: usize,
    pub failed: usize,
    /// Retries after retryable failures.
    pub retries: usize,
    /// Failures caused by throttling or rate limiting.
    pub throttled: usize,
    /// Retries answered with a duplicate key because an earlier attempt
    /// had been written.
    pub already_written: usize,
    /// Times the circuit breaker opened.
    pub circuit_opens: usize,
    /// Successful inserts whose Request Unit charge was reported.
    pub charged: usize,
    /// Request Units reported for successful inserts.
    pub total_request_units: f64,
    /// Latency of successful inserts.
    pub total_latency: Duration,
    pub max_latency: Duration,
    /// Final failures by error kind.
    pub failures_by_kind: BTreeMap<&'static str, usize>,
}

impl InsertMetrics {
    pub fn record_success(&mut self, latency: Duration, request_charge: Option<f64>) {
        self.inserted += 1;
        self.total_latency += latency;
        self.max_latency = self.max_latency.max(latency);
        if let Some(ru) = request_charge {
            self.charged += 1;
            self.total_request_units += ru;
        }
    }

    pub fn record_failure(&mut self, error: &VectorSearchError) {
        self.failed += 1;
        *self.failures_by_kind.entry(error.kind_label()).or_default() += 1;
    }

    pub fn record_retryable(&mut self, error: &VectorSearchError) {
        if matches!(
            error,
            VectorSearchError::Throttled { .. } | VectorSearchError::RateLimited { .. }
        ) {
            self.throttled += 1;
        }
    }

    /// Mean latency of successful inserts.
    pub fn avg_latency(&self) -> Duration {
        if self.inserted == 0 {
            Duration::ZERO
        } else {
            self.total_latency / self.inserted as u32
        }
    }

    /// Fraction of documents inserted.
    pub fn success_rate(&self) -> f64 {
        if self.documents == 0 {
            0.0
        } else {
            self.inserted as f64 / self.documents as f64
        }
    }
}

impl fmt::Display for InsertMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Documents:      {}", self.documents)?;
        writeln!(f, "Inserted:       {}", self.inserted)?;
        writeln!(f, "Failed:         {}", self.failed)?;
        writeln!(f, "Retries:        {}", self.retries)?;
        writeln!(f, "Throttled:      {}", self.throttled)?;
        writeln!(f, "Circuit opens:  {}", self.circuit_opens)?;
        if self.already_written > 0 {
            writeln!(f, "Already written: {}", self.already_written)?;
        }
        writeln!(
            f,
            "Request units:  {:.2} ({} of {} inserts charged)",
            self.total_request_units, self.charged, self.inserted
        )?;
        writeln!(
            f,
            "Latency:        avg {:?}, max {:?}",
            self.avg_latency(),
            self.max_latency
        )?;
        for (kind, count) in &self.failures_by_kind {
            writeln!(f, "  {}: {}", kind, count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_aggregates() {
        let mut metrics = InsertMetrics {
            documents: 3,
            ..Default::default()
        };
        metrics.record_success(Duration::from_millis(10), Some(5.5));
        metrics.record_success(Duration::from_millis(30), None);

        assert_eq!(metrics.inserted, 2);
        assert_eq!(metrics.avg_latency(), Duration::from_millis(20));
        assert_eq!(metrics.max_latency, Duration::from_millis(30));
        assert_eq!(metrics.total_request_units, 5.5);
        assert_eq!(metrics.charged, 1);
        assert!((metrics.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_failures_by_kind() {
        let mut metrics = InsertMetrics::default();
        metrics.record_failure(&VectorSearchError::DuplicateKey("E11000".to_string()));
        metrics.record_failure(&VectorSearchError::DuplicateKey("E11000".to_string()));
        metrics.record_failure(&VectorSearchError::Timeout);
        metrics.record_retryable(&VectorSearchError::Throttled {
            message: "16500".to_string(),
            retry_after: None,
        });

        assert_eq!(metrics.failed, 3);
        assert_eq!(metrics.failures_by_kind["duplicate_key"], 2);
        assert_eq!(metrics.failures_by_kind["timeout"], 1);
        assert_eq!(metrics.throttled, 1);
        assert_eq!(metrics.avg_latency(), Duration::ZERO);
        assert!(metrics.to_string().contains("duplicate_key: 2"));
    }
}
