//! Circuit breaker for destination protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: destination assumed down, calls fail fast
//! - Half-Open: probing whether the destination recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first call after reset_timeout has elapsed
//! Half-Open → Closed: 2 consecutive probe successes
//! Half-Open → Open: any probe failure
//! ```
//!
//! # Design Decisions
//! - One breaker per destination connection (not global)
//! - Fail fast in Open state; the rejection is not counted as a failure
//! - State lock is never held across an await

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Probe successes needed in Half-Open before closing.
pub const HALF_OPEN_SUCCESS_THRESHOLD: u32 = 2;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        })
    }
}

/// Returned instead of running the operation while the circuit is open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker is open for server '{destination}', retry in {retry_in:?}")]
pub struct CircuitOpen {
    pub destination: String,
    /// Time left until a probe is allowed.
    pub retry_in: Duration,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_successes: u32,
    pub last_failure: Option<Instant>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
}

impl Inner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_successes: 0,
            last_failure: None,
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    destination: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(destination: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let destination = destination.into();
        metrics::record_circuit_state(&destination, CircuitState::Closed as u8);
        Self {
            destination,
            config,
            inner: Mutex::new(Inner::closed()),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_successes: inner.half_open_successes,
            last_failure: inner.last_failure,
        }
    }

    /// Force the breaker closed and clear its history.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let previous = inner.state;
        *inner = Inner::closed();
        drop(inner);

        tracing::info!(destination = %self.destination, from = %previous, "Circuit breaker manually reset");
        metrics::record_circuit_state(&self.destination, CircuitState::Closed as u8);
    }

    /// Run `op` unless the circuit is open.
    ///
    /// A rejected call returns `E::from(CircuitOpen)` without running `op`.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpen>,
    {
        if !self.config.enabled {
            return op().await;
        }

        self.try_acquire().map_err(E::from)?;

        let result = op().await;
        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        result
    }

    fn try_acquire(&self) -> Result<(), CircuitOpen> {
        let mut inner = self.lock();
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let reset_timeout = self.config.reset_timeout();
        let elapsed = inner
            .last_failure
            .map_or(Duration::MAX, |at| at.elapsed());

        if elapsed > reset_timeout {
            inner.half_open_successes = 0;
            self.transition(&mut inner, CircuitState::HalfOpen);
            Ok(())
        } else {
            Err(CircuitOpen {
                destination: self.destination.clone(),
                retry_in: reset_timeout.saturating_sub(elapsed),
            })
        }
    }

    /// Record a completed call. While open the outcome is ignored; it came
    /// from a call admitted before the circuit tripped.
    fn on_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= HALF_OPEN_SUCCESS_THRESHOLD {
                    inner.failure_count = 0;
                    inner.half_open_successes = 0;
                    inner.last_failure = None;
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call. A failure that lands while already open is not
    /// counted and does not re-arm `last_failure`, so late results from calls
    /// admitted before the trip never extend the open window.
    fn on_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.last_failure = Some(Instant::now());
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes = 0;
                inner.last_failure = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;

        match to {
            CircuitState::Open => tracing::warn!(
                destination = %self.destination,
                %from,
                failures = inner.failure_count,
                reset_timeout_ms = self.config.reset_timeout_ms,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(destination = %self.destination, %from, to = %to, "Circuit breaker state change"),
        }
        metrics::record_circuit_state(&self.destination, to as u8);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Open,
        Failed,
    }

    impl From<CircuitOpen> for TestError {
        fn from(_: CircuitOpen) -> Self {
            TestError::Open
        }
    }

    fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                enabled: true,
                failure_threshold: threshold,
                reset_timeout_ms: reset_ms,
            },
        )
    }

    async fn fail(cb: &CircuitBreaker, runs: &AtomicU32) -> Result<(), TestError> {
        cb.execute(|| async {
            runs.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TestError::Failed)
        })
        .await
    }

    async fn succeed(cb: &CircuitBreaker, runs: &AtomicU32) -> Result<(), TestError> {
        cb.execute(|| async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<(), TestError>(())
        })
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_fails_fast() {
        let cb = breaker(3, 60_000);
        let runs = AtomicU32::new(0);
        assert_eq!(cb.state(), CircuitState::Closed);

        for _ in 0..3 {
            assert_eq!(fail(&cb, &runs).await, Err(TestError::Failed));
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        assert_eq!(succeed(&cb, &runs).await, Err(TestError::Open));
        assert_eq!(runs.load(Ordering::SeqCst), 3, "op must not run while open");
        assert_eq!(cb.snapshot().failure_count, 3, "rejection is not a failure");
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, 60_000);
        let runs = AtomicU32::new(0);

        fail(&cb, &runs).await.ok();
        fail(&cb, &runs).await.ok();
        succeed(&cb, &runs).await.unwrap();
        fail(&cb, &runs).await.ok();
        fail(&cb, &runs).await.ok();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_needs_two_successes() {
        let cb = breaker(1, 1_000);
        let runs = AtomicU32::new(0);
        fail(&cb, &runs).await.ok();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert_eq!(succeed(&cb, &runs).await, Err(TestError::Open), "reset timeout is exclusive");

        tokio::time::advance(Duration::from_millis(1)).await;
        succeed(&cb, &runs).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        succeed(&cb, &runs).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 1_000);
        let runs = AtomicU32::new(0);
        fail(&cb, &runs).await.ok();

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(fail(&cb, &runs).await, Err(TestError::Failed));
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Failure instant was re-armed: still open half a window later.
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(succeed(&cb, &runs).await, Err(TestError::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_while_open_keeps_window() {
        let cb = breaker(1, 1_000);
        let runs = AtomicU32::new(0);

        let straggler = cb.execute(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Err::<(), _>(TestError::Failed)
        });
        let (late, early) = tokio::join!(straggler, fail(&cb, &runs));
        assert_eq!(late, Err(TestError::Failed));
        assert_eq!(early, Err(TestError::Failed));
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().failure_count, 1);

        // Window still measured from the first failure at t=0.
        tokio::time::advance(Duration::from_millis(501)).await;
        succeed(&cb, &runs).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_breaker_is_inert() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                enabled: false,
                failure_threshold: 1,
                reset_timeout_ms: 60_000,
            },
        );
        let runs = AtomicU32::new(0);
        for _ in 0..5 {
            assert_eq!(fail(&cb, &runs).await, Err(TestError::Failed));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 5);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_open_circuit() {
        let cb = breaker(1, 60_000);
        let runs = AtomicU32::new(0);
        fail(&cb, &runs).await.ok();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert!(snap.last_failure.is_none());
        succeed(&cb, &runs).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_error_reports_remaining_time() {
        let cb = CircuitBreaker::new(
            "files",
            CircuitBreakerConfig {
                enabled: true,
                failure_threshold: 1,
                reset_timeout_ms: 10_000,
            },
        );
        let tripped = CircuitOpen {
            destination: "upstream".into(),
            retry_in: Duration::ZERO,
        };
        let _ = cb.execute(|| async move { Err::<(), _>(tripped) }).await;
        tokio::time::advance(Duration::from_millis(4_000)).await;

        let err = cb.execute(|| async { Ok::<(), CircuitOpen>(()) }).await.unwrap_err();
        assert_eq!(err.destination, "files");
        assert_eq!(err.retry_in, Duration::from_millis(6_000));
    }
}
