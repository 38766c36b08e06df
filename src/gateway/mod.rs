//! Gateway subsystem: the upstream-facing side.
//!
//! # Data Flow
//! ```text
//! Upstream line on stdin:
//!     → server.rs (decode, one task per request)
//!     → router.rs
//!         tools/list: fan out to every enabled destination, rebuild table
//!         tools/call: resolve name → pool → breaker → retry → deadline
//!     → error.rs (typed failure → JSON-RPC error object)
//!     → server.rs writer task (one line per response on stdout)
//! ```

pub mod error;
pub mod request;
pub mod router;
pub mod server;

pub use error::{ErrorKind, GatewayError};
pub use request::RequestId;
pub use router::GatewayRouter;
pub use server::GatewayServer;
