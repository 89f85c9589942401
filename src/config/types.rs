//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Relay server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub forward_host: String,
    pub forward_port: u16,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    pub buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Observer and diagnostics configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
    /// Print every event to the console
    pub console_detail: bool,
    pub summary: SummaryConfig,
    pub file: FileLogConfig,
}

/// Windowed throughput summary configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub format: SummaryFormat,
}

/// Output format of window summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryFormat {
    Text,
    Json,
}

/// Persistent event log configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileLogConfig {
    pub path: Option<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            forward_host: String::new(),
            forward_port: 0,
            connect_timeout: Duration::from_secs(10),
            buffer_size: crate::relay::DEFAULT_BUFFER_SIZE,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            console_detail: false,
            summary: SummaryConfig::default(),
            file: FileLogConfig::default(),
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(1),
            format: SummaryFormat::Text,
        }
    }
}

impl Default for FileLogConfig {
    fn default() -> Self {
        Self {
            path: None,
            flush_interval: Duration::from_secs(5),
        }
    }
}
