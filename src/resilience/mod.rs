//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Tool call to a destination:
//!     → circuit_breaker.rs (fail fast while the destination is open)
//!     → retries.rs (re-run failed attempts with backoff.rs delays)
//!     → timeouts.rs (each attempt races its own deadline)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every downstream call has a deadline
//! - A timeout is a failure like any other: it consumes an attempt and
//!   counts toward the breaker
//! - Circuit breaker prevents cascading failures
//! - All three layers are generic over the error type

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitOpen, CircuitSnapshot, CircuitState};
pub use retries::{RetryContext, RetryEngine, RetryOptions};
pub use timeouts::{DeadlineExceeded, TimeoutWatchdog};
