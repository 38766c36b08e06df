//! Retry logic.
//!
//! # Responsibilities
//! - Re-run a failing operation up to a fixed attempt budget
//! - Sleep with exponential backoff + jitter between attempts
//!
//! # Design Decisions
//! - Stateless: one engine can be shared by every call to a destination
//! - Every failure is retried; callers filter non-retryable cases before
//!   entering the engine
//! - Context is for logs and metrics only, never for decisions

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Per-call retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Total attempts including the first. 0 behaves like 1.
    pub max_attempts: u32,
    /// Base of the exponential delay.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

impl RetryOptions {
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Identifies the call being retried in logs.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    pub request_id: String,
    pub destination: String,
    pub tool: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryEngine;

impl RetryEngine {
    pub fn new() -> Self {
        Self
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// The error of the last attempt is returned unchanged.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        mut op: F,
        options: &RetryOptions,
        context: &RetryContext,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = options.effective_attempts();
        let mut attempt = 0u32;

        loop {
            let err = match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(
                            request_id = %context.request_id,
                            destination = %context.destination,
                            tool = %context.tool,
                            attempt = attempt + 1,
                            "Call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if attempt + 1 >= attempts {
                if attempts > 1 {
                    tracing::error!(
                        request_id = %context.request_id,
                        destination = %context.destination,
                        tool = %context.tool,
                        attempts,
                        error = %err,
                        "All retry attempts failed"
                    );
                }
                return Err(err);
            }

            let delay = calculate_backoff(
                attempt,
                duration_ms(options.base_delay),
                duration_ms(options.max_delay),
            );
            tracing::warn!(
                request_id = %context.request_id,
                destination = %context.destination,
                tool = %context.tool,
                attempt = attempt + 1,
                max_attempts = attempts,
                delay_ms = duration_ms(delay),
                error = %err,
                "Attempt failed, retrying"
            );
            metrics::record_retry(&context.destination);

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
