//! Server configuration.
//!
//! Loaded from a TOML file; every section has sensible defaults so an
//! empty file (or no file at all) yields a runnable server.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the TCP listener binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Cache sizing.
    #[serde(default)]
    pub cache: CacheSection,

    /// Per-connection IO buffer sizing.
    #[serde(default)]
    pub buffers: BufferSection,

    /// Logging output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            cache: CacheSection::default(),
            buffers: BufferSection::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Cache sizing options.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    /// Size of the arena holding all item bytes.
    #[serde(default = "default_arena_size")]
    pub arena_size: usize,

    /// Largest value payload a storage command may declare.
    #[serde(default = "default_max_value_size")]
    pub max_value_size: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            arena_size: default_arena_size(),
            max_value_size: default_max_value_size(),
        }
    }
}

/// IO buffer sizing options.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferSection {
    /// Initial allocation of each connection buffer.
    #[serde(default = "default_buffer_initial_size")]
    pub initial_size: usize,

    /// Growth ceiling of each connection buffer.
    #[serde(default = "default_buffer_max_size")]
    pub max_size: usize,
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            initial_size: default_buffer_initial_size(),
            max_size: default_buffer_max_size(),
        }
    }
}

/// Logging output options.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter level; the RUST_LOG environment variable wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Config {
    /// Load a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

fn default_listen() -> SocketAddr {
    "127.0.0.1:11211".parse().unwrap()
}

fn default_arena_size() -> usize {
    64 * 1024 * 1024
}

fn default_max_value_size() -> usize {
    1024 * 1024
}

fn default_buffer_initial_size() -> usize {
    4096
}

fn default_buffer_max_size() -> usize {
    30 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.listen.port(), 11211);
        assert_eq!(config.cache.arena_size, 64 * 1024 * 1024);
        assert_eq!(config.cache.max_value_size, 1024 * 1024);
        assert_eq!(config.buffers.max_size, 30 * 1024 * 1024);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            listen = "0.0.0.0:11311"

            [cache]
            arena_size = 1048576
            max_value_size = 65536

            [buffers]
            initial_size = 1024
            max_size = 2097152

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen.port(), 11311);
        assert_eq!(config.cache.arena_size, 1048576);
        assert_eq!(config.cache.max_value_size, 65536);
        assert_eq!(config.buffers.initial_size, 1024);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.listen.port(), 11211);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(toml::from_str::<Config>("unknown_key = 1").is_err());
    }
}
