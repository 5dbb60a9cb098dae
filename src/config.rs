//! Configuration module for the covid-lookup server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Command-line arguments for the lookup server
#[derive(Parser, Debug)]
#[command(name = "covid-lookup")]
#[command(author = "covid-lookup authors")]
#[command(version = "0.1.0")]
#[command(about = "A COVID dataset lookup server over TCP or Unix sockets", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Service endpoint: ip address and port, or socket path (e.g., :4040)
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Network protocol (tcp, tcp4, tcp6, unix)
    #[arg(short, long)]
    pub network: Option<String>,

    /// Path to the CSV dataset loaded at startup
    #[arg(short, long)]
    pub dataset: Option<PathBuf>,

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
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address or socket path to bind to
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Network protocol name
    #[serde(default = "default_network")]
    pub network: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            network: default_network(),
        }
    }
}

/// Dataset-related configuration
#[derive(Debug, Deserialize)]
pub struct DatasetConfig {
    /// CSV file holding the records
    #[serde(default = "default_dataset_path")]
    pub path: PathBuf,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: default_dataset_path(),
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

fn default_endpoint() -> String {
    ":4040".to_string()
}

fn default_network() -> String {
    "tcp".to_string()
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("covid_final_data.csv")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Transport used by the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    /// TCP on any address family.
    Tcp,
    /// TCP restricted to IPv4.
    Tcp4,
    /// TCP restricted to IPv6.
    Tcp6,
    /// Unix domain stream socket.
    Unix,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            "unix" => Ok(Network::Unix),
            other => Err(ConfigError::UnsupportedNetwork(other.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
            Network::Unix => "unix",
        };
        f.write_str(name)
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: String,
    pub network: Network,
    pub dataset: PathBuf,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge parsed CLI args over file values and validate the network name.
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let network = cli
            .network
            .unwrap_or(toml_config.server.network)
            .parse()?;

        Ok(Config {
            endpoint: cli.endpoint.unwrap_or(toml_config.server.endpoint),
            network,
            dataset: cli.dataset.unwrap_or(toml_config.dataset.path),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    UnsupportedNetwork(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::UnsupportedNetwork(name) => {
                write!(f, "unsupported network protocol: {name}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.endpoint, ":4040");
        assert_eq!(config.server.network, "tcp");
        assert_eq!(config.dataset.path, PathBuf::from("covid_final_data.csv"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            endpoint = "/tmp/covid.sock"
            network = "unix"

            [dataset]
            path = "/data/covid.csv"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.endpoint, "/tmp/covid.sock");
        assert_eq!(config.server.network, "unix");
        assert_eq!(config.dataset.path, PathBuf::from("/data/covid.csv"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_network_names() {
        assert_eq!("tcp".parse::<Network>().unwrap(), Network::Tcp);
        assert_eq!("tcp4".parse::<Network>().unwrap(), Network::Tcp4);
        assert_eq!("tcp6".parse::<Network>().unwrap(), Network::Tcp6);
        assert_eq!("unix".parse::<Network>().unwrap(), Network::Unix);
        assert_eq!(Network::Tcp6.to_string(), "tcp6");
    }

    #[test]
    fn test_unsupported_network() {
        match "udp".parse::<Network>() {
            Err(ConfigError::UnsupportedNetwork(name)) => assert_eq!(name, "udp"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!("TCP".parse::<Network>().is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let cli = CliArgs::parse_from([
            "covid-lookup",
            "-e",
            "127.0.0.1:5050",
            "--network",
            "tcp4",
        ]);
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            endpoint = ":9999"
            network = "unix"

            [dataset]
            path = "rows.csv"
        "#,
        )
        .unwrap();

        let config = Config::merge(cli, toml_config).unwrap();
        assert_eq!(config.endpoint, "127.0.0.1:5050");
        assert_eq!(config.network, Network::Tcp4);
        assert_eq!(config.dataset, PathBuf::from("rows.csv"));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_merge_rejects_bad_network() {
        let cli = CliArgs::parse_from(["covid-lookup", "-n", "udp"]);
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::UnsupportedNetwork(_))
        ));
    }
}
