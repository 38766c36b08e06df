//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start background tasks (health checks, metrics)
//! - Serve the upstream endpoint on stdin/stdout
//! - Run the ordered shutdown: timers, connections, upstream
//!
//! # Design Decisions
//! - Downstream servers are spawned lazily, on first use
//! - The upstream endpoint starts last and stops last

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;

use crate::config::validation::unused_field_warnings;
use crate::config::GatewayConfig;
use crate::gateway::{GatewayRouter, GatewayServer};
use crate::health::HealthMonitor;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;
use crate::protocol::{Connector, StdioConnector};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("upstream endpoint failed: {0}")]
    Upstream(#[from] io::Error),
}

/// Run the gateway on the process's stdin/stdout until EOF or a signal.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    let connector = Arc::new(StdioConnector::new(config.global_defaults.handshake_timeout()));
    serve(config, connector, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Run the gateway over arbitrary upstream streams.
pub async fn serve<R, W>(
    config: GatewayConfig,
    connector: Arc<dyn Connector>,
    reader: R,
    writer: W,
) -> Result<(), StartupError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    for warning in unused_field_warnings(&config) {
        tracing::warn!("{warning}");
    }

    if config.observability.metrics_enabled {
        start_metrics(&config.observability.metrics_address);
    }

    let config = Arc::new(config);
    tracing::info!(
        servers = config.servers.len(),
        enabled = config.enabled_destinations().count(),
        "mcp-gateway v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let router = Arc::new(GatewayRouter::new(Arc::clone(&config), connector));

    let background = Shutdown::new();
    let mut monitors = JoinSet::new();
    for destination in config.enabled_destinations().filter(|d| d.health_check.enabled) {
        let monitor = HealthMonitor::new(
            Arc::clone(router.connection_pool()),
            destination,
            destination.effective_timeout(&config.global_defaults),
        );
        monitors.spawn(monitor.run(background.subscribe()));
    }

    let upstream = Shutdown::new();
    let server = GatewayServer::new(Arc::clone(&router));
    let serving = server.run(reader, writer, upstream.subscribe());
    tokio::pin!(serving);

    let finished = tokio::select! {
        result = &mut serving => Some(result),
        signal = signals::wait_for_signal() => {
            tracing::info!(%signal, "Stopping gateway");
            None
        }
    };

    background.trigger();
    router.shutdown().await;

    let result = match finished {
        Some(result) => result,
        None => {
            upstream.trigger();
            serving.await
        }
    };

    while monitors.join_next().await.is_some() {}

    result?;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn start_metrics(address: &str) {
    match address.parse::<SocketAddr>() {
        Ok(addr) => {
            if let Err(e) = metrics::init_metrics(addr) {
                tracing::error!(address = %addr, error = %e, "Failed to start metrics exporter");
            }
        }
        Err(e) => {
            tracing::error!(metrics_address = %address, error = %e, "Failed to parse metrics address");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DestinationConfig;
    use crate::testing::{FakeConnector, FakeServer};
    use serde_json::Value;
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_serve_until_eof_closes_connections() {
        let connector = Arc::new(FakeConnector::new().with_server("a", FakeServer::with_tools(&["t"])));
        let config = GatewayConfig {
            servers: vec![DestinationConfig::new("a", "fake")],
            ..GatewayConfig::default()
        };

        let (client, server_side) = duplex(16 * 1024);
        let (server_read, server_write) = split(server_side);
        let (client_read, mut client_write) = split(client);

        let gateway = tokio::spawn(serve(
            config,
            Arc::clone(&connector) as Arc<dyn Connector>,
            server_read,
            server_write,
        ));

        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}\n")
            .await
            .unwrap();
        let mut lines = BufReader::new(client_read).lines();
        let response: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(response["result"]["tools"][0]["name"], "a__t");

        client_write.shutdown().await.unwrap();
        gateway.await.unwrap().unwrap();
        assert_eq!(connector.close_count("a"), 1);
    }
}
