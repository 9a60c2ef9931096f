//! Closed / open / half-open circuit breaker.

use std::time::Duration;
use tokio::time::Instant;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until `until`.
    Open { until: Instant },
    /// One trial call is allowed after the cooldown.
    HalfOpen,
}

/// Counts consecutive failures and opens after `failure_threshold` of them.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether a call may proceed now.
    ///
    /// Returns the remaining cooldown while open. An elapsed cooldown moves
    /// the breaker to half-open and admits the call.
    pub fn check(&mut self) -> Result<(), Duration> {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { until } => {
                let now = Instant::now();
                if now >= until {
                    self.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(until - now)
                }
            }
        }
    }

    /// Close the circuit and reset the failure count.
    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
    }

    /// Record a failure. Returns true when this failure opened the circuit.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let trip = match self.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => self.consecutive_failures >= self.failure_threshold,
            CircuitState::Open { .. } => false,
        };

        if trip {
            self.state = CircuitState::Open {
                until: Instant::now() + self.cooldown,
            };
        }
        trip
    }
}
