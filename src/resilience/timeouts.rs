//! Timeout enforcement.
//!
//! # Responsibilities
//! - Keep one armed deadline timer per request id
//! - Fire a callback exactly once when a deadline passes
//! - Race a future against its deadline
//!
//! # Design Decisions
//! - Timers are Tokio tasks; cancelling aborts the task
//! - Each timer carries a generation so a stale timer never removes a
//!   newer entry for the same id
//! - A timed-out future is dropped, not cancelled at its source
//! - After `close` no timer is armed again

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// The deadline for a request passed before it settled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("request {request_id} timed out after {}ms", .timeout.as_millis())]
pub struct DeadlineExceeded {
    pub request_id: String,
    pub timeout: Duration,
}

#[derive(Debug)]
struct TimerEntry {
    generation: u64,
    handle: AbortHandle,
}

/// Registry of one-shot deadline timers keyed by request id.
#[derive(Debug, Default)]
pub struct TimeoutWatchdog {
    timers: Arc<DashMap<String, TimerEntry>>,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl TimeoutWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer for `request_id`, replacing any existing one.
    ///
    /// Returns the timer's generation, usable with [`cancel_generation`](Self::cancel_generation).
    /// Once the watchdog is closed nothing is armed and `on_timeout` never runs.
    pub fn start<F>(&self, request_id: &str, timeout: Duration, on_timeout: F) -> u64
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        if self.is_closed() {
            tracing::trace!(request_id = %request_id, "Watchdog closed, deadline not armed");
            return generation;
        }
        let timers = Arc::clone(&self.timers);
        let key = request_id.to_string();

        // The entry guard is held while spawning, so the timer cannot
        // observe the map before its own entry is in place.
        let entry = self.timers.entry(key.clone());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if timers
                .remove_if(&key, |_, e| e.generation == generation)
                .is_some()
            {
                tracing::debug!(request_id = %key, timeout_ms = timeout.as_millis() as u64, "Deadline fired");
                on_timeout();
            }
        })
        .abort_handle();

        let timer = TimerEntry { generation, handle };
        match entry {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(timer);
                previous.handle.abort();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(timer);
            }
        }
        generation
    }

    /// Disarm the timer for `request_id`. No-op if none is armed.
    pub fn cancel(&self, request_id: &str) {
        if let Some((_, entry)) = self.timers.remove(request_id) {
            entry.handle.abort();
        }
    }

    /// Disarm the timer for `request_id` only if it is still `generation`.
    pub fn cancel_generation(&self, request_id: &str, generation: u64) {
        if let Some((_, entry)) = self
            .timers
            .remove_if(request_id, |_, e| e.generation == generation)
        {
            entry.handle.abort();
        }
    }

    /// Disarm every timer.
    pub fn cancel_all(&self) {
        let mut cancelled = 0usize;
        self.timers.retain(|_, entry| {
            entry.handle.abort();
            cancelled += 1;
            false
        });
        if cancelled > 0 {
            tracing::debug!(cancelled, "Cancelled all pending deadlines");
        }
    }

    /// Disarm every timer and refuse to arm new ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }

    /// Await `fut`, failing with [`DeadlineExceeded`] if the timer for
    /// `request_id` fires first. The timer is disarmed once `fut` settles
    /// or the returned future is dropped.
    ///
    /// A timer cancelled from outside (e.g. `cancel_all`) does not count
    /// as a timeout; `fut` is then awaited without a deadline.
    pub async fn race<F, T>(&self, request_id: &str, timeout: Duration, fut: F) -> Result<T, DeadlineExceeded>
    where
        F: Future<Output = T>,
    {
        let (fired_tx, fired_rx) = oneshot::channel::<()>();
        let generation = self.start(request_id, timeout, move || {
            let _ = fired_tx.send(());
        });
        let _disarm = DisarmOnDrop {
            watchdog: self,
            request_id,
            generation,
        };

        tokio::select! {
            biased;
            output = fut => Ok(output),
            Ok(()) = fired_rx => Err(DeadlineExceeded {
                request_id: request_id.to_string(),
                timeout,
            }),
        }
    }
}

struct DisarmOnDrop<'a> {
    watchdog: &'a TimeoutWatchdog,
    request_id: &'a str,
    generation: u64,
}

impl Drop for DisarmOnDrop<'_> {
    fn drop(&mut self) {
        self.watchdog
            .cancel_generation(self.request_id, self.generation);
    }
}
