//! Tool aggregation and call dispatch.
//!
//! # Responsibilities
//! - Build the aggregated catalog across all enabled destinations
//! - Resolve aggregated names back to (destination, tool)
//! - Execute calls through breaker → retry → deadline
//!
//! # Design Decisions
//! - Listing fans out concurrently but output follows declaration order
//! - One failing destination contributes an empty list, never an error
//! - Name problems are rejected before any downstream contact
//! - `disabled` only hides a destination from listing; calls still reach it

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::{DestinationConfig, GatewayConfig};
use crate::gateway::error::GatewayError;
use crate::gateway::request::RequestId;
use crate::observability::{metrics, spans};
use crate::pool::{ConnectionPool, DownstreamConnection};
use crate::protocol::{Connector, Tool};
use crate::resilience::{RetryContext, RetryOptions, TimeoutWatchdog};
use crate::routing::{parse_tool_name, ToolMapping, ToolTable, ToolTableBuilder};

pub struct GatewayRouter {
    config: Arc<GatewayConfig>,
    pool: Arc<ConnectionPool>,
    watchdog: Arc<TimeoutWatchdog>,
    tools: ToolTable,
}

impl std::fmt::Debug for GatewayRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRouter")
            .field("destinations", &self.config.servers.len())
            .field("pool", &self.pool)
            .field("mapped_tools", &self.tools.len())
            .finish()
    }
}

impl GatewayRouter {
    pub fn new(config: Arc<GatewayConfig>, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            pool: Arc::new(ConnectionPool::new(connector)),
            watchdog: Arc::new(TimeoutWatchdog::new()),
            tools: ToolTable::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn connection_pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn watchdog(&self) -> &Arc<TimeoutWatchdog> {
        &self.watchdog
    }

    /// Current aggregated name → destination table.
    pub fn tool_table(&self) -> &ToolTable {
        &self.tools
    }

    /// Obtain (or create) the connection for a configured destination.
    pub async fn connect(&self, destination: &DestinationConfig) -> Result<Arc<DownstreamConnection>, GatewayError> {
        self.pool
            .create_connection(destination, &self.config.global_defaults.circuit_breaker)
            .await
            .map_err(|source| GatewayError::Connection {
                destination: destination.id.clone(),
                source,
            })
    }

    /// List every tool of every enabled destination under its aggregated name.
    pub async fn list_tools(&self) -> Vec<Tool> {
        self.tools.clear();

        let destinations: Vec<&DestinationConfig> = self.config.enabled_destinations().collect();
        let span = spans::list_tools_span(destinations.len());

        async {
            let per_destination = join_all(destinations.iter().map(|d| self.fetch_tools(d))).await;

            let mut builder = ToolTableBuilder::new();
            let mut tools = Vec::new();
            for (destination, listed) in destinations.iter().zip(per_destination) {
                for tool in listed {
                    let aggregated = builder.insert(&destination.id, &tool.name);
                    tools.push(decorate(tool, &destination.id, aggregated));
                }
            }

            if builder.collisions() > 0 {
                tracing::warn!(collisions = builder.collisions(), "Tool name collisions in aggregated catalog");
            }
            self.tools.publish(builder);
            metrics::set_tools_listed(tools.len());
            tracing::info!(tools = tools.len(), "Aggregated tool catalog built");
            tools
        }
        .instrument(span)
        .await
    }

    async fn fetch_tools(&self, destination: &DestinationConfig) -> Vec<Tool> {
        let conn = match self.connect(destination).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(destination = %destination.id, error = %e, "Skipping destination in tool listing");
                return Vec::new();
            }
        };

        let timeout = destination.effective_timeout(&self.config.global_defaults);
        match tokio::time::timeout(timeout, conn.client().list_tools()).await {
            Ok(Ok(tools)) => {
                tracing::debug!(destination = %destination.id, count = tools.len(), "Listed downstream tools");
                tools
            }
            Ok(Err(e)) => {
                tracing::warn!(destination = %destination.id, error = %e, "tools/list failed");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    destination = %destination.id,
                    timeout_ms = timeout.as_millis() as u64,
                    "tools/list timed out"
                );
                Vec::new()
            }
        }
    }

    /// Resolve an aggregated name: table first, then split on the first `__`.
    pub fn resolve(&self, name: &str) -> Result<ToolMapping, GatewayError> {
        if let Some(mapping) = self.tools.get(name) {
            return Ok(mapping);
        }
        match parse_tool_name(name) {
            Some((destination, tool)) => Ok(ToolMapping {
                destination: destination.to_string(),
                tool: tool.to_string(),
            }),
            None => Err(GatewayError::InvalidToolName {
                name: name.to_string(),
            }),
        }
    }

    /// Call a tool by its aggregated name.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, GatewayError> {
        let request_id = RequestId::new();
        let mapping = self.resolve(name)?;

        let destination = self
            .config
            .destination(&mapping.destination)
            .ok_or_else(|| GatewayError::UnknownDestination {
                destination: mapping.destination.clone(),
                name: name.to_string(),
            })?;

        let span = spans::tool_call_span(request_id.as_str(), &destination.id, &mapping.tool);
        let started = Instant::now();
        let result = self
            .execute(&request_id, destination, &mapping.tool, arguments)
            .instrument(span)
            .await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind().as_str(),
        };
        metrics::record_tool_call(&destination.id, outcome, started.elapsed());
        result
    }

    async fn execute(
        &self,
        request_id: &RequestId,
        destination: &DestinationConfig,
        tool: &str,
        arguments: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let conn = self.connect(destination).await?;

        let defaults = &self.config.global_defaults;
        let timeout = destination.effective_timeout(defaults);
        let options = RetryOptions {
            max_attempts: destination.effective_retry_attempts(defaults),
            base_delay: defaults.retry_delay(),
            max_delay: defaults.retry_max_delay(),
        };
        let attempts = options.effective_attempts();
        let context = RetryContext {
            request_id: request_id.to_string(),
            destination: destination.id.clone(),
            tool: tool.to_string(),
        };

        tracing::debug!(timeout_ms = timeout.as_millis() as u64, attempts, "Dispatching tool call");

        conn.circuit_breaker()
            .execute(|| async {
                conn.retry_engine()
                    .execute_with_retry(
                        || self.attempt(&conn, request_id, tool, arguments.clone(), timeout),
                        &options,
                        &context,
                    )
                    .await
                    .map_err(|last| {
                        if attempts > 1 {
                            GatewayError::RetriesExhausted {
                                attempts,
                                source: Box::new(last),
                            }
                        } else {
                            last
                        }
                    })
            })
            .await
    }

    /// One attempt: `tools/call` raced against this request's deadline.
    async fn attempt(
        &self,
        conn: &DownstreamConnection,
        request_id: &RequestId,
        tool: &str,
        arguments: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let call = conn.client().call_tool(tool, arguments);
        match self.watchdog.race(request_id.as_str(), timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(GatewayError::Downstream {
                destination: conn.destination_id().to_string(),
                source,
            }),
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Tool call timed out");
                metrics::record_timeout(conn.destination_id());
                Err(GatewayError::Timeout {
                    destination: conn.destination_id().to_string(),
                    tool: tool.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Force a destination's breaker closed. Returns false if it has no connection.
    pub fn reset_circuit(&self, destination: &str) -> bool {
        match self.pool.get_connection(destination) {
            Some(conn) => {
                conn.circuit_breaker().reset();
                true
            }
            None => false,
        }
    }

    /// Cancel every deadline, then close every connection. Both stay
    /// closed: later calls neither arm deadlines nor spawn servers.
    pub async fn shutdown(&self) {
        tracing::info!(
            timers = self.watchdog.active_count(),
            connections = self.pool.active_connection_count(),
            "Gateway router shutting down"
        );
        self.watchdog.close();
        self.pool.close_all().await;
    }
}

fn decorate(mut tool: Tool, destination: &str, aggregated: String) -> Tool {
    let summary = match tool.description.as_deref() {
        Some(description) if !description.trim().is_empty() => description.to_string(),
        _ => tool.name.clone(),
    };
    tool.description = Some(format!(
        "[Server: {destination}] {summary}. Use this tool by calling {aggregated}."
    ));
    tool.name = aggregated;
    tool
}
