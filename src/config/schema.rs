//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Config format version, informational.
    pub version: String,

    /// Defaults applied to every destination without an override.
    #[serde(alias = "globalDefaults")]
    pub global_defaults: GlobalDefaults,

    /// Downstream tool servers keyed by id, in declaration order.
    #[serde(alias = "downstream_servers", alias = "downstreamServers", with = "ordered_servers")]
    pub servers: Vec<DestinationConfig>,

    /// Log sink settings.
    pub logging: LoggingConfig,

    /// Metrics exporter settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            global_defaults: GlobalDefaults::default(),
            servers: Vec::new(),
            logging: LoggingConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Look up a destination by id.
    pub fn destination(&self, id: &str) -> Option<&DestinationConfig> {
        self.servers.iter().find(|d| d.id == id)
    }

    /// Destinations not marked disabled, in declaration order.
    pub fn enabled_destinations(&self) -> impl Iterator<Item = &DestinationConfig> {
        self.servers.iter().filter(|d| !d.disabled)
    }
}

/// Defaults shared by all destinations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalDefaults {
    /// Per-attempt deadline for a tool call in milliseconds.
    #[serde(alias = "timeout")]
    pub timeout_ms: u64,

    /// Attempts per tool call (1 = no retry).
    #[serde(alias = "retryAttempts")]
    pub retry_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    #[serde(alias = "retryDelay")]
    pub retry_delay_ms: u64,

    /// Cap on a single backoff delay in milliseconds.
    #[serde(alias = "retryMaxDelay")]
    pub retry_max_delay_ms: u64,

    /// Deadline for spawn + initialize handshake in milliseconds.
    #[serde(alias = "handshakeTimeout")]
    pub handshake_timeout_ms: u64,

    /// Circuit breaker settings, shared by every destination.
    #[serde(alias = "circuitBreaker")]
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            handshake_timeout_ms: 30_000,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl GlobalDefaults {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// When false the breaker never opens.
    pub enabled: bool,

    /// Consecutive failures that open the circuit.
    #[serde(alias = "failureThreshold")]
    pub failure_threshold: u32,

    /// Time the circuit stays open before a trial call is allowed, in milliseconds.
    #[serde(alias = "resetTimeout")]
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Launch spec for one downstream tool server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DestinationConfig {
    /// Unique id; taken from the table key.
    #[serde(skip)]
    pub id: String,

    /// Executable to spawn.
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables, layered over the gateway's own.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Hidden from the aggregated listing when true; calls still reach it.
    #[serde(default)]
    pub disabled: bool,

    /// Overrides `global_defaults.timeout_ms`.
    #[serde(default, alias = "timeout")]
    pub timeout_ms: Option<u64>,

    /// Overrides `global_defaults.retry_attempts`.
    #[serde(default, alias = "retryAttempts", alias = "retries")]
    pub retry_attempts: Option<u32>,

    /// Optional periodic probe of the running process.
    #[serde(default, alias = "healthCheck")]
    pub health_check: HealthCheckConfig,

    /// Accepted for compatibility; not consulted by routing.
    #[serde(default, alias = "fallbackServers", skip_serializing_if = "Vec::is_empty")]
    pub fallback_servers: Vec<String>,

    /// Accepted for compatibility; the global breaker threshold applies.
    #[serde(default, alias = "circuitBreakerThreshold", skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_threshold: Option<u32>,
}

impl DestinationConfig {
    /// Minimal destination running `command` with no arguments.
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            disabled: false,
            timeout_ms: None,
            retry_attempts: None,
            health_check: HealthCheckConfig::default(),
            fallback_servers: Vec::new(),
            circuit_breaker_threshold: None,
        }
    }

    /// Per-attempt deadline: override or global default.
    pub fn effective_timeout(&self, defaults: &GlobalDefaults) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(defaults.timeout_ms))
    }

    /// Attempt budget: override or global default.
    pub fn effective_retry_attempts(&self, defaults: &GlobalDefaults) -> u32 {
        self.retry_attempts.unwrap_or(defaults.retry_attempts)
    }
}

/// Health probe configuration for one destination.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable periodic probing.
    pub enabled: bool,

    /// JSON-RPC method used as the probe.
    pub method: String,

    /// Probe interval in milliseconds.
    #[serde(alias = "interval")]
    pub interval_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            method: "ping".to_string(),
            interval_ms: 30_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    #[serde(alias = "simple")]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive).
    pub level: String,

    /// Output format for every sink.
    pub format: LogFormat,

    /// Optional log file, appended to. Supports a `~` / `$HOME` prefix.
    pub file: Option<PathBuf>,

    /// Rotated copies of `file` kept on startup.
    #[serde(alias = "maxFiles")]
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
            max_files: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus exporter.
    #[serde(alias = "metricsEnabled")]
    pub metrics_enabled: bool,

    /// Exporter bind address.
    #[serde(alias = "metricsAddress")]
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// (De)serializes the server table as an ordered list, keeping the
/// declaration order of the source file and filling in each `id`.
mod ordered_servers {
    use std::fmt;

    use serde::de::{Error as _, MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::DestinationConfig;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<DestinationConfig>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ServersVisitor;

        impl<'de> Visitor<'de> for ServersVisitor {
            type Value = Vec<DestinationConfig>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of downstream servers keyed by id")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut servers: Vec<DestinationConfig> = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((id, mut server)) = map.next_entry::<String, DestinationConfig>()? {
                    if servers.iter().any(|s| s.id == id) {
                        return Err(A::Error::custom(format!("duplicate server id `{id}`")));
                    }
                    server.id = id;
                    servers.push(server);
                }
                Ok(servers)
            }
        }

        deserializer.deserialize_map(ServersVisitor)
    }

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S>(servers: &Vec<DestinationConfig>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(servers.len()))?;
        for server in servers {
            map.serialize_entry(&server.id, server)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_preserves_declaration_order() {
        let raw = r#"
            [servers.zeta]
            command = "zeta-server"

            [servers.alpha]
            command = "alpha-server"
            args = ["--stdio"]
            disabled = true

            [servers.mid]
            command = "mid-server"
            timeout_ms = 500
            retry_attempts = 1
        "#;
        let config: GatewayConfig = toml::from_str(raw).unwrap();
        let ids: Vec<&str> = config.servers.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);

        let enabled: Vec<&str> = config.enabled_destinations().map(|s| s.id.as_str()).collect();
        assert_eq!(enabled, vec!["zeta", "mid"]);
        assert_eq!(config.destination("alpha").unwrap().args, vec!["--stdio"]);
    }

    #[test]
    fn test_json_alias_and_defaults() {
        let raw = r#"{
            "global_defaults": {"timeout_ms": 1000},
            "downstream_servers": {
                "b": {"command": "b-cmd", "env": {"TOKEN": "x"}},
                "a": {"command": "a-cmd"}
            }
        }"#;
        let config: GatewayConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.servers[0].id, "b");
        assert_eq!(config.servers[1].id, "a");
        assert_eq!(config.servers[0].env["TOKEN"], "x");
        assert_eq!(config.global_defaults.timeout_ms, 1000);
        assert_eq!(config.global_defaults.retry_attempts, 3);
        assert!(config.global_defaults.circuit_breaker.enabled);
    }

    #[test]
    fn test_duplicate_server_ids_rejected() {
        let raw = r#"{"servers": {"a": {"command": "x"}, "a": {"command": "y"}}}"#;
        let err = serde_json::from_str::<GatewayConfig>(raw).unwrap_err();
        assert!(err.to_string().contains("duplicate server id"));
    }

    #[test]
    fn test_effective_overrides() {
        let defaults = GlobalDefaults::default();
        let mut dest = DestinationConfig::new("a", "cmd");
        assert_eq!(dest.effective_timeout(&defaults), Duration::from_millis(30_000));
        assert_eq!(dest.effective_retry_attempts(&defaults), 3);

        dest.timeout_ms = Some(250);
        dest.retry_attempts = Some(1);
        assert_eq!(dest.effective_timeout(&defaults), Duration::from_millis(250));
        assert_eq!(dest.effective_retry_attempts(&defaults), 1);
    }

    #[test]
    fn test_serialize_keeps_table_shape() {
        let mut config = GatewayConfig::default();
        config.servers.push(DestinationConfig::new("first", "one"));
        config.servers.push(DestinationConfig::new("second", "two"));

        let rendered = toml::to_string(&config).unwrap();
        let parsed: GatewayConfig = toml::from_str(&rendered).unwrap();
        let ids: Vec<&str> = parsed.servers.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }
}
