//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Upper bound (exclusive) of the random jitter added to each delay.
pub const MAX_JITTER_MS: u64 = 1_000;

/// Delay before the attempt following `attempt` (0-based).
///
/// `min(base_ms * 2^attempt + uniform[0, 1000ms), max_ms)`
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
    backoff_with_jitter(attempt, base_ms, max_ms, jitter)
}

fn backoff_with_jitter(attempt: u32, base_ms: u64, max_ms: u64, jitter_ms: u64) -> Duration {
    let exponential = 2u64.saturating_pow(attempt);
    let delay_ms = base_ms.saturating_mul(exponential).saturating_add(jitter_ms);
    Duration::from_millis(delay_ms.min(max_ms))
}
