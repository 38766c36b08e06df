//! Gateway error kinds and their JSON-RPC mapping.

use std::fmt;

use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::types::{error_codes, JsonRpcError};
use crate::protocol::ClientError;
use crate::resilience::CircuitOpen;

/// Coarse classification of a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidToolName,
    UnknownDestination,
    Connection,
    CircuitOpen,
    Timeout,
    RetriesExhausted,
    Downstream,
    Transport,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidToolName => "invalid_tool_name",
            ErrorKind::UnknownDestination => "unknown_destination",
            ErrorKind::Connection => "connection_failed",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::Downstream => "downstream_error",
            ErrorKind::Transport => "transport_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the gateway router.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("invalid tool name '{name}': expected <server>__<tool>")]
    InvalidToolName { name: String },

    #[error("unknown server '{destination}' for tool '{name}'")]
    UnknownDestination { destination: String, name: String },

    #[error("failed to connect to server '{destination}': {source}")]
    Connection {
        destination: String,
        #[source]
        source: ClientError,
    },

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),

    #[error("tool '{tool}' on server '{destination}' timed out after {timeout_ms}ms")]
    Timeout {
        destination: String,
        tool: String,
        timeout_ms: u64,
    },

    #[error("tool call failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<GatewayError>,
    },

    #[error("server '{destination}': {source}")]
    Downstream {
        destination: String,
        #[source]
        source: ClientError,
    },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::InvalidToolName { .. } => ErrorKind::InvalidToolName,
            GatewayError::UnknownDestination { .. } => ErrorKind::UnknownDestination,
            GatewayError::Connection { .. } => ErrorKind::Connection,
            GatewayError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            GatewayError::Downstream {
                source: ClientError::Server { .. },
                ..
            } => ErrorKind::Downstream,
            GatewayError::Downstream { .. } => ErrorKind::Transport,
        }
    }

    /// JSON-RPC code reported to upstream callers.
    pub fn code(&self) -> i32 {
        match self {
            GatewayError::InvalidToolName { .. }
            | GatewayError::UnknownDestination { .. } => error_codes::INVALID_PARAMS,
            GatewayError::Connection { .. } => error_codes::CONNECTION_FAILED,
            GatewayError::CircuitOpen(_) => error_codes::CIRCUIT_OPEN,
            GatewayError::Timeout { .. } => error_codes::REQUEST_TIMEOUT,
            GatewayError::RetriesExhausted { .. } => error_codes::RETRIES_EXHAUSTED,
            GatewayError::Downstream {
                source: ClientError::Server { code, .. },
                ..
            } => *code,
            GatewayError::Downstream { .. } => error_codes::INTERNAL_ERROR,
        }
    }

    /// Build the `error` object of a JSON-RPC response.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        JsonRpcError::new(self.code(), self.to_string()).with_data(self.data())
    }

    fn data(&self) -> Value {
        let mut data = json!({ "kind": self.kind().as_str() });
        match self {
            GatewayError::UnknownDestination { destination, .. }
            | GatewayError::Connection { destination, .. }
            | GatewayError::Timeout { destination, .. } => {
                data["destination"] = json!(destination);
            }
            GatewayError::CircuitOpen(open) => {
                data["destination"] = json!(open.destination);
                data["retry_after_ms"] = json!(open.retry_in.as_millis() as u64);
            }
            GatewayError::RetriesExhausted { attempts, source } => {
                data["attempts"] = json!(attempts);
                data["last_error"] = json!({
                    "code": source.code(),
                    "message": source.to_string(),
                    "data": source.data(),
                });
            }
            GatewayError::Downstream { destination, source } => {
                data["destination"] = json!(destination);
                if let ClientError::Server { data: Some(inner), .. } = source {
                    data["downstream"] = inner.clone();
                }
            }
            GatewayError::InvalidToolName { .. } => {}
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_codes_per_kind() {
        let invalid = GatewayError::InvalidToolName { name: "x".into() };
        assert_eq!(invalid.code(), -32602);
        assert_eq!(invalid.kind(), ErrorKind::InvalidToolName);

        let open = GatewayError::from(CircuitOpen {
            destination: "a".into(),
            retry_in: Duration::from_secs(3),
        });
        assert_eq!(open.code(), -32001);

        let timeout = GatewayError::Timeout {
            destination: "a".into(),
            tool: "t".into(),
            timeout_ms: 500,
        };
        assert_eq!(timeout.code(), -32002);

        let connection = GatewayError::Connection {
            destination: "a".into(),
            source: ClientError::Spawn {
                server: "a".into(),
                reason: "not found".into(),
            },
        };
        assert_eq!(connection.code(), -32004);
    }

    #[test]
    fn test_downstream_keeps_its_code() {
        let err = GatewayError::Downstream {
            destination: "a".into(),
            source: ClientError::Server {
                code: -32000,
                message: "disk full".into(),
                data: Some(json!({"free": 0})),
            },
        };
        assert_eq!(err.kind(), ErrorKind::Downstream);

        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, -32000);
        assert!(rpc.message.contains("disk full"));
        let data = rpc.data.unwrap();
        assert_eq!(data["kind"], "downstream_error");
        assert_eq!(data["downstream"]["free"], 0);
    }

    #[test]
    fn test_transport_failure_is_internal() {
        let err = GatewayError::Downstream {
            destination: "a".into(),
            source: ClientError::Closed { server: "a".into() },
        };
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.code(), -32603);
    }

    #[test]
    fn test_retries_exhausted_carries_last_error() {
        let err = GatewayError::RetriesExhausted {
            attempts: 3,
            source: Box::new(GatewayError::Timeout {
                destination: "a".into(),
                tool: "slow".into(),
                timeout_ms: 100,
            }),
        };
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, -32003);
        let data = rpc.data.unwrap();
        assert_eq!(data["kind"], "retries_exhausted");
        assert_eq!(data["attempts"], 3);
        assert_eq!(data["last_error"]["code"], -32002);
        assert_eq!(data["last_error"]["data"]["kind"], "timeout");
    }
}
