//! Downstream connection pool.
//!
//! # Data Flow
//! ```text
//! Router needs destination X:
//!     → manager.rs (cached? alive? in flight?)
//!     → on miss: Connector spawns + handshakes (single-flight)
//!     → connection.rs (client + breaker + retry engine)
//! ```
//!
//! # Design Decisions
//! - One connection per destination id
//! - Breaker state lives with the connection and is lost on reconnect
//! - Dead processes are evicted on the next request, or by the health monitor

pub mod connection;
pub mod manager;

pub use connection::DownstreamConnection;
pub use manager::ConnectionPool;
