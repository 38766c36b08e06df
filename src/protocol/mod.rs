//! Tool protocol plumbing.
//!
//! # Data Flow
//! ```text
//! Gateway needs a downstream:
//!     → client.rs (Connector spawns the process, runs the handshake)
//!     → transport.rs (line-delimited JSON-RPC on the child's stdio)
//!     → types.rs (request/response/tool payloads)
//! ```
//!
//! # Design Decisions
//! - Responses are matched to requests by id; many calls share one process
//! - Child process handle is kept for liveness checks and termination
//! - Server-initiated requests are refused, notifications are logged

pub mod client;
pub mod errors;
pub mod transport;
pub mod types;

pub use client::{Connector, StdioConnector, StdioToolClient, ToolClient};
pub use errors::ClientError;
pub use types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, Tool};
