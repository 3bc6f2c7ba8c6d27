//! Command-line configuration.
//!
//! Flag names follow the dotted style operators already use for this
//! exporter (`--es.uri`, `--web.listen-address`, ...). `ES_URI` in the
//! environment wins over `--es.uri`.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address {0:?}")]
    ListenAddress(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Logfmt,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogOutput {
    Stdout,
    Stderr,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "elasticsearch_exporter", author, version, about, long_about = None)]
pub struct Config {
    /// Address to listen on for web interface and telemetry.
    #[arg(long = "web.listen-address", default_value = ":9108")]
    pub listen_address: String,

    /// Path under which to expose metrics.
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    pub metrics_path: String,

    /// HTTP API address of an Elasticsearch node.
    #[arg(long = "es.uri", default_value = "http://localhost:9200")]
    pub es_uri: String,

    /// Timeout for trying to get stats from Elasticsearch.
    #[arg(long = "es.timeout", default_value = "5s", value_parser = parse_duration)]
    pub es_timeout: Duration,

    /// Cluster info update interval for the cluster label.
    #[arg(long = "es.clusterinfo.interval", default_value = "5m", value_parser = parse_duration)]
    pub clusterinfo_interval: Duration,

    /// Export the number of read-only indices from /_all/_settings.
    #[arg(long = "es.all-settings")]
    pub export_all_settings: bool,

    /// Log level: debug, info, warn, error. RUST_LOG takes precedence.
    #[arg(long = "log.level", default_value = "info")]
    pub log_level: String,

    #[arg(long = "log.format", value_enum, default_value_t = LogFormat::Logfmt)]
    pub log_format: LogFormat,

    #[arg(long = "log.output", value_enum, default_value_t = LogOutput::Stdout)]
    pub log_output: LogOutput,
}

impl Config {
    /// Parse process arguments and apply environment overrides.
    pub fn load() -> Self {
        let mut config = Self::parse();
        if let Ok(uri) = std::env::var("ES_URI") {
            config.es_uri = uri;
        }
        config
    }

    /// `:9108` binds every interface.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = if self.listen_address.starts_with(':') {
            format!("0.0.0.0{}", self.listen_address)
        } else {
            self.listen_address.clone()
        };
        addr.parse()
            .map_err(|_| ConfigError::ListenAddress(self.listen_address.clone()))
    }
}

/// Parse `300ms`, `5s`, `5m` or `1h`. A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {:?}", s))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(format!("unknown duration unit {:?} in {:?}", other, s)),
    }
}
