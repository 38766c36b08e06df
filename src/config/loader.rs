//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "MCP_GATEWAY_CONFIG";

/// Default config location, relative to the home directory.
const DEFAULT_CONFIG_RELATIVE: &str = ".mcp-gateway/config.toml";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Parse error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML or JSON file.
///
/// The format is picked from the extension: `.json` is JSON, anything else TOML.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut config = parse_config(path, &content)?;
    if let Some(file) = config.logging.file.take() {
        config.logging.file = Some(expand_home(&file));
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load the config at `path`, or fall back to defaults when the file is absent.
pub fn load_or_default(path: &Path) -> Result<GatewayConfig, ConfigError> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "Config file not found, starting with no downstream servers");
        return Ok(GatewayConfig::default());
    }
    load_config(path)
}

/// On-disk shape: either the bare config or the same config nested under a
/// `common-mcp` key. The nested form wins when present.
#[derive(Deserialize)]
struct ConfigFile {
    #[serde(rename = "common-mcp")]
    wrapped: Option<GatewayConfig>,

    #[serde(flatten)]
    bare: GatewayConfig,
}

impl ConfigFile {
    fn into_config(self) -> GatewayConfig {
        self.wrapped.unwrap_or(self.bare)
    }
}

fn parse_config(path: &Path, content: &str) -> Result<GatewayConfig, ConfigError> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let file: ConfigFile = if is_json {
        serde_json::from_str(content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        toml::from_str(content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?
    };
    Ok(file.into_config())
}

/// Pick the config path: explicit argument, then `MCP_GATEWAY_CONFIG`, then
/// `~/.mcp-gateway/config.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return expand_home(path);
    }
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return expand_home(Path::new(&path));
    }
    match home_dir() {
        Some(home) => home.join(DEFAULT_CONFIG_RELATIVE),
        None => PathBuf::from(DEFAULT_CONFIG_RELATIVE),
    }
}

/// Expand a leading `~` or `$HOME` into the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Some(raw) = path.to_str() else {
        return path.to_path_buf();
    };
    let Some(home) = home_dir() else {
        return path.to_path_buf();
    };

    for prefix in ["~", "$HOME"] {
        if raw == prefix {
            return home;
        }
        if let Some(rest) = raw.strip_prefix(prefix).and_then(|r| r.strip_prefix('/')) {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}
