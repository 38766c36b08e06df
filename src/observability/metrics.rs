//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_tool_calls_total` (counter): tool calls by destination, outcome
//! - `gateway_tool_call_duration_seconds` (histogram): end-to-end call latency
//! - `gateway_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `gateway_retries_total` (counter): retry attempts by destination
//! - `gateway_timeouts_total` (counter): watchdog expirations by destination
//! - `gateway_active_connections` (gauge): live downstream processes
//! - `gateway_tools_listed` (gauge): size of the last aggregated catalog
//! - `gateway_destination_health` (gauge): 1=healthy, 0=unhealthy
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is optional and bound to a configured address

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics exporter listening");
    Ok(())
}

pub fn record_tool_call(destination: &str, outcome: &'static str, duration: Duration) {
    counter!(
        "gateway_tool_calls_total",
        "destination" => destination.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "gateway_tool_call_duration_seconds",
        "destination" => destination.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_circuit_state(destination: &str, state: u8) {
    gauge!("gateway_circuit_state", "destination" => destination.to_string()).set(f64::from(state));
}

pub fn record_retry(destination: &str) {
    counter!("gateway_retries_total", "destination" => destination.to_string()).increment(1);
}

pub fn record_timeout(destination: &str) {
    counter!("gateway_timeouts_total", "destination" => destination.to_string()).increment(1);
}

pub fn set_active_connections(count: usize) {
    gauge!("gateway_active_connections").set(count as f64);
}

pub fn set_tools_listed(count: usize) {
    gauge!("gateway_tools_listed").set(count as f64);
}

pub fn record_destination_health(destination: &str, healthy: bool) {
    gauge!("gateway_destination_health", "destination" => destination.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}
