//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs), one task per destination:
//!     Periodic timer
//!     → Probe the pooled connection (default method: ping)
//!     → Exited process? evict from the pool
//!     → Export outcome as a gauge
//! ```
//!
//! # Design Decisions
//! - Opt-in per destination
//! - Probes never create connections; pooling stays lazy
//! - A failed probe on a live process is reported, not acted on

pub mod active;

pub use active::{HealthMonitor, ProbeOutcome};
