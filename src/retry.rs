//! Retry executor with exponential backoff.
//!
//! Wraps an async operation and retries it according to a
//! [`RetryStrategy`], either given explicitly or derived from the first
//! error. Service retry hints (`retry-after`, `RetryAfterMs`) stretch the
//! computed delay but never shorten it.
//!
//! # Usage
//!
//! ```ignore
//! use cosmos_vector_search::retry::RetryExecutor;
//!
//! let executor = RetryExecutor::new();
//! let batch = executor.execute_auto(|| embedder.embed(&texts)).await?;
//! ```

use crate::error::{RetryStrategy, VectorSearchError};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Executor for retry logic with configurable backoff strategies.
#[derive(Debug, Default)]
pub struct RetryExecutor {
    log_retries: bool,
}

impl RetryExecutor {
    /// Create a new retry executor that logs each retry.
    pub fn new() -> Self {
        Self { log_retries: true }
    }

    /// Create a retry executor without logging.
    pub fn silent() -> Self {
        Self { log_retries: false }
    }

    /// Execute an async operation with automatic retry based on `strategy`.
    ///
    /// Returns the first success, or the last error once attempts run out
    /// or a non-retryable error is seen.
    pub async fn execute<F, Fut, T>(
        &self,
        strategy: &RetryStrategy,
        mut operation: F,
    ) -> Result<T, VectorSearchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VectorSearchError>>,
    {
        match strategy {
            RetryStrategy::NoRetry => operation().await,

            RetryStrategy::WaitAndRetry { wait } => {
                match operation().await {
                    Ok(v) => Ok(v),
                    Err(e) => {
                        let wait = e.retry_after().map_or(*wait, |hint| hint.max(*wait));
                        if self.log_retries {
                            warn!("Operation failed, waiting {:?} before retry: {}", wait, e);
                        }
                        sleep(wait).await;
                        operation().await
                    }
                }
            }

            RetryStrategy::ExponentialBackoff {
                base_delay,
                max_delay,
                max_attempts,
            } => {
                self.execute_exponential_backoff(*base_delay, *max_delay, *max_attempts, operation)
                    .await
            }
        }
    }

    async fn execute_exponential_backoff<F, Fut, T>(
        &self,
        base_delay: Duration,
        max_delay: Duration,
        max_attempts: u32,
        mut operation: F,
    ) -> Result<T, VectorSearchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VectorSearchError>>,
    {
        let mut delay = base_delay;
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(v) => {
                    if attempts > 1 && self.log_retries {
                        info!("Operation succeeded after {} attempts", attempts);
                    }
                    return Ok(v);
                }
                Err(e) => {
                    if attempts >= max_attempts {
                        if self.log_retries {
                            warn!(
                                "Operation failed after {} attempts, giving up: {}",
                                attempts, e
                            );
                        }
                        return Err(e);
                    }

                    if !e.is_recoverable() {
                        if self.log_retries {
                            debug!("Error is non-retryable, stopping: {}", e);
                        }
                        return Err(e);
                    }

                    let wait = e.retry_after().map_or(delay, |hint| hint.max(delay));
                    if self.log_retries {
                        warn!(
                            "Attempt {}/{} failed, retrying in {:?}: {}",
                            attempts, max_attempts, wait, e
                        );
                    }

                    sleep(wait).await;
                    delay = (delay * 2).min(max_delay);
                }
            }
        }
    }

    /// Execute an operation, picking the retry strategy from the first error.
    pub async fn execute_auto<F, Fut, T>(&self, mut operation: F) -> Result<T, VectorSearchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VectorSearchError>>,
    {
        match operation().await {
            Ok(v) => Ok(v),
            Err(e) => {
                let strategy = e.retry_strategy();

                if !strategy.should_retry() {
                    return Err(e);
                }

                if self.log_retries {
                    debug!("First attempt failed, using strategy {:?}: {}", strategy, e);
                }

                match strategy {
                    RetryStrategy::WaitAndRetry { wait } => {
                        sleep(wait).await;
                        operation().await
                    }
                    RetryStrategy::ExponentialBackoff {
                        base_delay,
                        max_delay,
                        max_attempts,
                    } => {
                        sleep(base_delay).await;
                        // one attempt already spent
                        self.execute_exponential_backoff(
                            (base_delay * 2).min(max_delay),
                            max_delay,
                            max_attempts.saturating_sub(1).max(1),
                            operation,
                        )
                        .await
                    }
                    RetryStrategy::NoRetry => Err(e),
                }
            }
        }
    }
}
