//! Circuit breaker guarding every pool-mediated directory call.
//!
//! # State transitions
//! ```text
//! Closed   -> Open:     failure_threshold consecutive failures
//! Open     -> HalfOpen: first call after open_duration (becomes the probe)
//! HalfOpen -> Closed:   probe succeeds
//! HalfOpen -> Open:     probe fails, clock restarts
//! ```
//!
//! Every error returned from a guarded call counts as a failure, including duplicate logins and
//! pool saturation. Input rejections ([`FailureClass::Neutral`]) leave the state untouched.

use crate::Result;
use adprov_core::{BreakerConfig, Error, FailureClass};
use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected without touching the directory.
    Open,
    /// One probe call is deciding whether to close again.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Three-state circuit breaker with a single half-open probe.
pub struct CircuitBreaker {
    threshold: u32,
    open_duration: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            threshold: config.failure_threshold.max(1),
            open_duration: config.open_duration(),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Runs `operation` if the breaker admits it and records the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] without running `operation` while the circuit is open or a
    /// half-open probe is already in flight; otherwise returns the operation's own result.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut permit = self.admit()?;
        let outcome = operation().await;
        permit.settle(outcome.as_ref().err());
        outcome
    }

    /// Forces the breaker closed with a zero failure count.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let previous = inner.state;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        info!(from = %previous, "circuit breaker reset to closed");
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Consecutive failures recorded since the last close.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Result<Permit<'_>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map_or(self.open_duration, |at| at.elapsed());
                if elapsed < self.open_duration {
                    return Err(Error::CircuitOpen {
                        retry_after: self.open_duration - elapsed,
                    });
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                info!("circuit breaker half-open, admitting probe");
                Ok(Permit::new(self, true))
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(Error::CircuitOpen {
                        retry_after: Duration::ZERO,
                    });
                }
                inner.probe_in_flight = true;
                debug!("circuit breaker admitting replacement probe");
                Ok(Permit::new(self, true))
            }
        }
    }

    fn record(&self, probe: bool, error: Option<&Error>) {
        let class = error.map(Error::failure_class);
        let mut inner = self.lock();
        if probe {
            inner.probe_in_flight = false;
        }

        match class {
            Some(FailureClass::Neutral) => {}
            None => match inner.state {
                CircuitState::Closed => inner.failure_count = 0,
                CircuitState::HalfOpen if probe => {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.opened_at = None;
                    info!("circuit breaker probe succeeded, closed");
                }
                // stale outcome of a call admitted before the circuit opened
                CircuitState::HalfOpen | CircuitState::Open => {}
            },
            Some(FailureClass::Failure) => match inner.state {
                CircuitState::Closed => {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.threshold {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                        warn!(
                            failures = inner.failure_count,
                            threshold = self.threshold,
                            "circuit breaker opened"
                        );
                    }
                }
                CircuitState::HalfOpen if probe => {
                    inner.failure_count += 1;
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        failures = inner.failure_count,
                        "circuit breaker probe failed, reopened"
                    );
                }
                CircuitState::HalfOpen | CircuitState::Open => {}
            },
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

/// Admission ticket; a probe that is dropped unsettled hands its slot back.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    const fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    fn settle(&mut self, error: Option<&Error>) {
        self.settled = true;
        self.breaker.record(self.probe, error);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}
