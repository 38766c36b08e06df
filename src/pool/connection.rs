//! A live link to one destination.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::protocol::ToolClient;
use crate::resilience::{CircuitBreaker, RetryEngine};

/// One downstream connection with its own breaker and retry engine.
pub struct DownstreamConnection {
    destination_id: String,
    client: Arc<dyn ToolClient>,
    circuit_breaker: CircuitBreaker,
    retry_engine: RetryEngine,
    connected: AtomicBool,
    created_at: Instant,
}

impl fmt::Debug for DownstreamConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownstreamConnection")
            .field("destination_id", &self.destination_id)
            .field("connected", &self.is_connected())
            .field("circuit_state", &self.circuit_breaker.state())
            .field("age", &self.age())
            .finish()
    }
}

impl DownstreamConnection {
    pub fn new(
        destination_id: impl Into<String>,
        client: Arc<dyn ToolClient>,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let destination_id = destination_id.into();
        Self {
            circuit_breaker: CircuitBreaker::new(destination_id.clone(), breaker_config),
            retry_engine: RetryEngine::new(),
            destination_id,
            client,
            connected: AtomicBool::new(true),
            created_at: Instant::now(),
        }
    }

    pub fn destination_id(&self) -> &str {
        &self.destination_id
    }

    pub fn client(&self) -> &Arc<dyn ToolClient> {
        &self.client
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn retry_engine(&self) -> &RetryEngine {
        &self.retry_engine
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connected and the peer process is still running.
    pub fn is_alive(&self) -> bool {
        self.is_connected() && self.client.is_alive()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Close the client once; later calls do nothing.
    pub async fn close(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.client.close().await {
            tracing::warn!(destination = %self.destination_id, error = %e, "Error closing downstream connection");
        }
    }
}
