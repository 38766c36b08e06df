//! MCP stdio gateway library.
//!
//! Aggregates many tool servers, each a subprocess speaking JSON-RPC over
//! stdio, behind one upstream endpoint. Every downstream call runs through
//! a per-destination circuit breaker, a retry engine and a deadline.

// Core subsystems
pub mod config;
pub mod gateway;
pub mod pool;
pub mod protocol;
pub mod routing;

// Cross-cutting concerns
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

#[cfg(test)]
mod testing;

pub use config::GatewayConfig;
pub use gateway::{GatewayError, GatewayRouter, GatewayServer};
pub use lifecycle::Shutdown;
