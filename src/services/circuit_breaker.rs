//! Consecutive-failure circuit breaker guarding calls to the settlement gateway.
//!
//! ```text
//! CLOSED ──(threshold consecutive failures)──► OPEN
//!   ▲                                           │ cooldown elapsed
//!   │ trial succeeds                            ▼
//!   └─────────────────────────────────────── HALF_OPEN ──(trial fails)──► OPEN
//! ```
//!
//! Half-open admits exactly one trial call; concurrent callers are rejected
//! until the trial settles.

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a trial call.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker is open")]
    Open,
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
enum Inner {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen { trial_in_flight: bool },
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Current state without side effects. An open circuit whose cooldown has
    /// elapsed reports `HalfOpen`, as the next call would be a trial.
    pub fn state(&self) -> CircuitState {
        match &*self.inner.lock() {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { until } if Instant::now() >= *until => CircuitState::HalfOpen,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Asks permission for one call. Every `true` must be followed by exactly
    /// one `record_success` or `record_failure`.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Closed { .. } => true,
            Inner::Open { until } => {
                if Instant::now() >= *until {
                    tracing::info!("Circuit breaker half-open, admitting trial call");
                    *inner = Inner::HalfOpen {
                        trial_in_flight: true,
                    };
                    true
                } else {
                    false
                }
            }
            Inner::HalfOpen { trial_in_flight } => {
                if *trial_in_flight {
                    false
                } else {
                    *trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if matches!(*inner, Inner::HalfOpen { .. }) {
            tracing::info!("Circuit breaker closed after successful trial");
        }
        *inner = Inner::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures = *consecutive_failures,
                        cooldown_secs = self.config.cooldown.as_secs_f64(),
                        "Circuit breaker opened"
                    );
                    *inner = Inner::Open {
                        until: Instant::now() + self.config.cooldown,
                    };
                }
            }
            Inner::HalfOpen { .. } => {
                tracing::warn!("Circuit breaker trial failed, reopening");
                *inner = Inner::Open {
                    until: Instant::now() + self.config.cooldown,
                };
            }
            Inner::Open { .. } => {}
        }
    }

    /// Runs `fut` under the breaker. Errors for which `is_failure` returns
    /// `false` (for example a 4xx business rejection) count as successes.
    /// A call dropped before completion counts as a failure.
    pub async fn call<T, E, F>(
        &self,
        fut: F,
        is_failure: impl Fn(&E) -> bool,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(CircuitBreakerError::Open);
        }

        let mut pending = PendingCall {
            breaker: self,
            settled: false,
        };
        let result = fut.await;
        pending.settled = true;

        match &result {
            Err(e) if is_failure(e) => self.record_failure(),
            _ => self.record_success(),
        }
        result.map_err(CircuitBreakerError::Inner)
    }
}

struct PendingCall<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record_failure();
        }
    }
}
