//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe a destination's pooled connection
//! - Evict connections whose process has exited
//! - Export probe outcomes

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::config::{DestinationConfig, HealthCheckConfig};
use crate::observability::metrics;
use crate::pool::ConnectionPool;
use crate::protocol::ClientError;

/// Result of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// No connection has been established yet; nothing to probe.
    Idle,
    Healthy,
    Unhealthy,
    /// The process was gone and the connection was dropped from the pool.
    Evicted,
}

pub struct HealthMonitor {
    pool: Arc<ConnectionPool>,
    destination: String,
    config: HealthCheckConfig,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(pool: Arc<ConnectionPool>, destination: &DestinationConfig, timeout: Duration) -> Self {
        Self {
            pool,
            destination: destination.id.clone(),
            config: destination.health_check.clone(),
            timeout,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::debug!(destination = %self.destination, "Active health checks disabled");
            return;
        }

        tracing::info!(
            destination = %self.destination,
            interval_ms = self.config.interval_ms,
            method = %self.config.method,
            "Health monitor starting"
        );

        let interval = Duration::from_millis(self.config.interval_ms);
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!(destination = %self.destination, "Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    pub async fn check_once(&self) -> ProbeOutcome {
        let Some(conn) = self.pool.get_connection(&self.destination) else {
            tracing::trace!(destination = %self.destination, "No connection to probe");
            return ProbeOutcome::Idle;
        };

        if !conn.is_alive() {
            tracing::warn!(destination = %self.destination, "Health check found exited process, evicting");
            self.pool.close_connection(&self.destination).await;
            metrics::record_destination_health(&self.destination, false);
            return ProbeOutcome::Evicted;
        }

        let probe = conn.client().request(&self.config.method, None);
        let outcome = match time::timeout(self.timeout, probe).await {
            Ok(Ok(_)) => ProbeOutcome::Healthy,
            Ok(Err(ClientError::Closed { .. })) => {
                tracing::warn!(destination = %self.destination, "Health check failed: connection closed, evicting");
                self.pool.close_connection(&self.destination).await;
                ProbeOutcome::Evicted
            }
            Ok(Err(e)) => {
                tracing::warn!(destination = %self.destination, error = %e, "Health check failed");
                ProbeOutcome::Unhealthy
            }
            Err(_) => {
                tracing::warn!(
                    destination = %self.destination,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Health check failed: timeout"
                );
                ProbeOutcome::Unhealthy
            }
        };

        metrics::record_destination_health(&self.destination, outcome == ProbeOutcome::Healthy);
        outcome
    }
}
