//! Downstream client error types.

use thiserror::Error;

/// Errors raised while talking to one downstream tool server.
///
/// `Clone` so a single in-flight connection attempt can hand the same
/// outcome to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The server process failed to start.
    #[error("failed to spawn server '{server}': {reason}")]
    Spawn { server: String, reason: String },

    /// The initialization handshake failed or timed out.
    #[error("server '{server}' initialization failed: {reason}")]
    Handshake { server: String, reason: String },

    /// I/O or framing failure on the stdio channel.
    #[error("transport error for server '{server}': {reason}")]
    Transport { server: String, reason: String },

    /// The server answered with a JSON-RPC error object.
    #[error("server error [{code}]: {message}")]
    Server {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The server answered with a payload we could not decode.
    #[error("unexpected payload from server '{server}': {reason}")]
    Protocol { server: String, reason: String },

    /// The connection was closed before or while the request was in flight.
    #[error("connection to server '{server}' is closed")]
    Closed { server: String },
}
