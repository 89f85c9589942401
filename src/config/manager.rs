//! Configuration Manager

use super::{Config, SummaryFormat};
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest accepted pump buffer
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from a TOML file, falling back to defaults when it
    /// does not exist. Validation is left to the caller because the forward
    /// target usually arrives later from the command line.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            tracing::info!("Configuration loaded successfully");
            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            Ok(Config::default())
        }
    }

    /// Override `config` with any `TCP_TRACKER_*` variables that are set
    pub fn apply_env(config: &mut Config) -> Result<()> {
        if let Ok(listen_addr) = std::env::var("TCP_TRACKER_LISTEN_ADDR") {
            config.server.listen_addr = listen_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid TCP_TRACKER_LISTEN_ADDR: {}", listen_addr))?;
        }

        if let Ok(host) = std::env::var("TCP_TRACKER_FORWARD_HOST") {
            config.server.forward_host = host;
        }

        if let Ok(port) = std::env::var("TCP_TRACKER_FORWARD_PORT") {
            config.server.forward_port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid TCP_TRACKER_FORWARD_PORT: {}", port))?;
        }

        if let Ok(buffer_size) = std::env::var("TCP_TRACKER_BUFFER_SIZE") {
            config.server.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid TCP_TRACKER_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(timeout) = std::env::var("TCP_TRACKER_CONNECT_TIMEOUT") {
            config.server.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid TCP_TRACKER_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Ok(path) = std::env::var("TCP_TRACKER_LOG_FILE") {
            config.logging.file.path = Some(PathBuf::from(path));
        }

        if let Ok(log_level) = std::env::var("TCP_TRACKER_LOG_LEVEL") {
            config.logging.log_level = log_level;
        }

        Ok(())
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    /// `host:port` the relay dials for every session
    pub fn forward_target(&self) -> String {
        format!("{}:{}", self.server.forward_host, self.server.forward_port)
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.forward_host.trim().is_empty() {
            bail!("forward_host must be set");
        }

        if self.server.forward_port == 0 {
            bail!("forward_port must be greater than 0");
        }

        if self.server.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than 0");
        }

        if self.server.connect_timeout > Duration::from_secs(300) {
            bail!("connect_timeout cannot exceed 5 minutes");
        }

        if self.server.buffer_size == 0 {
            bail!("buffer_size must be at least 1 byte");
        }

        if self.server.buffer_size > MAX_BUFFER_SIZE {
            bail!("buffer_size cannot exceed 1MB");
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.log_level.as_str()) {
            bail!("logging.log_level must be one of: {}", valid_log_levels.join(", "));
        }

        if self.logging.summary.enabled && self.logging.summary.window.is_zero() {
            bail!("logging.summary.window must be greater than 0");
        }

        if let Some(path) = &self.logging.file.path {
            if path.as_os_str().is_empty() {
                bail!("logging.file.path must not be empty");
            }
            if self.logging.file.flush_interval.is_zero() {
                bail!("logging.file.flush_interval must be greater than 0");
            }
        }

        Ok(())
    }

    /// Merge with CLI arguments
    #[allow(clippy::too_many_arguments)]
    pub fn merge_with_cli_args(
        &mut self,
        listen_port: Option<u16>,
        forward_host: Option<&str>,
        forward_port: Option<u16>,
        log_file: Option<&Path>,
        detailed_console: bool,
        buffer_size: Option<usize>,
        summary_window: Option<Duration>,
        json_summary: bool,
    ) {
        if let Some(port) = listen_port {
            self.server.listen_addr.set_port(port);
            tracing::info!("CLI override: listen port set to {}", port);
        }

        if let Some(host) = forward_host {
            self.server.forward_host = host.to_string();
            tracing::info!("CLI override: forward host set to {}", host);
        }

        if let Some(port) = forward_port {
            self.server.forward_port = port;
            tracing::info!("CLI override: forward port set to {}", port);
        }

        if let Some(path) = log_file {
            self.logging.file.path = Some(path.to_path_buf());
            tracing::info!("CLI override: event log file set to {}", path.display());
        }

        if detailed_console {
            self.logging.console_detail = true;
            tracing::info!("CLI override: detailed console logging enabled");
        }

        if let Some(buffer_size) = buffer_size {
            self.server.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }

        if let Some(window) = summary_window {
            self.logging.summary.window = window;
            tracing::info!("CLI override: summary window set to {:?}", window);
        }

        if json_summary {
            self.logging.summary.format = SummaryFormat::Json;
            tracing::info!("CLI override: summaries printed as JSON");
        }
    }
}
