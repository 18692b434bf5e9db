//! Configuration module for the ackd server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::runtime::PoolConfig;
use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the acknowledgement server
#[derive(Parser, Debug, Default)]
#[command(name = "ackd")]
#[command(author = "ackd authors")]
#[command(version = "0.1.0")]
#[command(about = "A pre-forked TCP acceptor that acknowledges one message per connection", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Interface address to bind to (e.g., 0.0.0.0)
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Listen backlog depth, also used to size the worker pool
    #[arg(short, long, allow_hyphen_values = true)]
    pub backlog: Option<i32>,

    /// Per-connection read timeout in seconds (unbounded when unset)
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Interface address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen backlog depth
    #[serde(default = "default_backlog")]
    pub listen_backlog: i32,
    /// Read timeout in seconds
    pub read_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            listen_backlog: default_backlog(),
            read_timeout_secs: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    12345
}

fn default_backlog() -> i32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub listen_backlog: i32,
    pub read_timeout: Option<Duration>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merge already-parsed CLI args with the TOML file they point at.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            listen_backlog: cli.backlog.unwrap_or(toml_config.server.listen_backlog),
            read_timeout: cli
                .read_timeout
                .or(toml_config.server.read_timeout_secs)
                .map(Duration::from_secs),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Build the worker pool configuration.
    pub fn pool_config(&self) -> Result<PoolConfig, ConfigError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.host.clone()))?;

        Ok(PoolConfig {
            addr: SocketAddr::new(ip, self.port),
            listen_backlog: self.listen_backlog,
            read_timeout: self.read_timeout,
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidAddress(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidAddress(host) => {
                write!(f, "Invalid bind address '{host}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 12345);
        assert_eq!(config.server.listen_backlog, 5);
        assert!(config.server.read_timeout_secs.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 9000
            listen_backlog = 16
            read_timeout_secs = 30

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.listen_backlog, 16);
        assert_eq!(config.server.read_timeout_secs, Some(30));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 9000\nlisten_backlog = 8\n\n[logging]\nlevel = \"warn\""
        )
        .unwrap();

        let cli = CliArgs {
            config: Some(file.path().to_path_buf()),
            port: Some(7000),
            log_level: "info".to_string(),
            ..CliArgs::default()
        };

        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.listen_backlog, 8);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.log_level, "warn");
        assert!(config.read_timeout.is_none());
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs {
            config: Some(PathBuf::from("/nonexistent/ackd.toml")),
            log_level: "info".to_string(),
            ..CliArgs::default()
        };

        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::FileRead(_, _))
        ));
    }

    #[test]
    fn test_pool_config() {
        let cli = CliArgs {
            host: Some("127.0.0.1".to_string()),
            port: Some(0),
            backlog: Some(3),
            read_timeout: Some(2),
            log_level: "info".to_string(),
            ..CliArgs::default()
        };

        let pool = Config::from_cli(cli).unwrap().pool_config().unwrap();
        assert_eq!(pool.addr, "127.0.0.1:0".parse().unwrap());
        assert_eq!(pool.listen_backlog, 3);
        assert_eq!(pool.read_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_invalid_host() {
        let config = Config {
            host: "not-an-ip".to_string(),
            port: 1,
            listen_backlog: 1,
            read_timeout: None,
            log_level: "info".to_string(),
        };

        assert!(matches!(
            config.pool_config(),
            Err(ConfigError::InvalidAddress(_))
        ));
    }
}
