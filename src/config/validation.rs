//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts, attempts and thresholds > 0)
//! - Flag accepted-but-unused fields
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// One semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let defaults = &config.global_defaults;

    if defaults.timeout_ms == 0 {
        errors.push(ValidationError::new("global_defaults.timeout_ms", "must be greater than 0"));
    }
    if defaults.retry_attempts == 0 {
        errors.push(ValidationError::new("global_defaults.retry_attempts", "must be at least 1"));
    }
    if defaults.handshake_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "global_defaults.handshake_timeout_ms",
            "must be greater than 0",
        ));
    }
    if defaults.retry_max_delay_ms < defaults.retry_delay_ms {
        errors.push(ValidationError::new(
            "global_defaults.retry_max_delay_ms",
            "must not be smaller than retry_delay_ms",
        ));
    }

    let breaker = &defaults.circuit_breaker;
    if breaker.enabled && breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "global_defaults.circuit_breaker.failure_threshold",
            "must be greater than 0",
        ));
    }
    if breaker.enabled && breaker.reset_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "global_defaults.circuit_breaker.reset_timeout_ms",
            "must be greater than 0",
        ));
    }

    for server in &config.servers {
        let prefix = format!("servers.{}", server.id);

        if server.id.trim().is_empty() {
            errors.push(ValidationError::new("servers", "server id must not be empty"));
        }
        if server.command.trim().is_empty() {
            errors.push(ValidationError::new(format!("{prefix}.command"), "must not be empty"));
        }
        if server.timeout_ms == Some(0) {
            errors.push(ValidationError::new(format!("{prefix}.timeout_ms"), "must be greater than 0"));
        }
        if server.retry_attempts == Some(0) {
            errors.push(ValidationError::new(format!("{prefix}.retry_attempts"), "must be at least 1"));
        }
        if server.health_check.enabled {
            if server.health_check.interval_ms == 0 {
                errors.push(ValidationError::new(
                    format!("{prefix}.health_check.interval_ms"),
                    "must be greater than 0",
                ));
            }
            if server.health_check.method.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("{prefix}.health_check.method"),
                    "must not be empty",
                ));
            }
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address (host:port)",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Fields that parse but have no effect, as human-readable warnings.
pub fn unused_field_warnings(config: &GatewayConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    for server in &config.servers {
        if !server.fallback_servers.is_empty() {
            warnings.push(format!(
                "servers.{}.fallback_servers is accepted but not used for routing",
                server.id
            ));
        }
        if server.circuit_breaker_threshold.is_some() {
            warnings.push(format!(
                "servers.{}.circuit_breaker_threshold is ignored; global_defaults.circuit_breaker.failure_threshold applies",
                server.id
            ));
        }
    }
    warnings
}
