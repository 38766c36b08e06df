//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config (already loaded) → metrics → pool + router → health monitors
//!     → upstream endpoint on stdio
//!
//! Shutdown (shutdown.rs):
//!     Signal or stdin EOF → cancel timers → close connections → stop upstream
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then the endpoint
//! - Ordered shutdown: nothing downstream outlives the gateway

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{wait_for_signal, ShutdownSignal};
pub use startup::{run, serve, StartupError};
