//! Spans carrying request correlation fields.
//!
//! Every tool call runs inside a span holding its request id, so log lines
//! emitted by the pool, breaker and retry engine share the id.

use tracing::Span;

/// Span for one upstream `tools/call`.
pub fn tool_call_span(request_id: &str, destination: &str, tool: &str) -> Span {
    tracing::info_span!("tool_call", request_id = %request_id, destination = %destination, tool = %tool)
}

/// Span for one aggregated `tools/list`.
pub fn list_tools_span(destinations: usize) -> Span {
    tracing::info_span!("list_tools", destinations)
}

/// Span for one upstream JSON-RPC request.
pub fn upstream_request_span(method: &str, id: &serde_json::Value) -> Span {
    tracing::debug_span!("upstream", method = %method, id = %id)
}
