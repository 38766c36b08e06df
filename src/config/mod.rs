//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML/JSON)
//!     → loader.rs (resolve path, parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Server table keeps declaration order; it decides listing order
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, resolve_config_path, ConfigError};
pub use schema::{
    CircuitBreakerConfig, DestinationConfig, GatewayConfig, GlobalDefaults, HealthCheckConfig,
    LogFormat, LoggingConfig, ObservabilityConfig,
};
