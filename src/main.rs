//! TCP Tracker - transparent TCP relay with traffic observers

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tcp_tracker::{
    config::{Config, ConfigManager, SummaryFormat},
    observer::{ConsoleObserver, FileObserver, StdoutReportSink, SummaryObserver},
    ConnectionCounters, ConnectionManager, Dispatcher, ShutdownCoordinator,
};

/// CLI arguments for TCP Tracker
#[derive(Parser, Debug)]
#[command(name = "tcp-tracker")]
#[command(about = "Transparent TCP relay that reports the traffic it forwards")]
#[command(version)]
#[command(long_about = "
TCP Tracker - transparent TCP relay

Every client accepted on the listen port is connected to the forward host and
bytes are copied both ways until either side closes. A throughput summary is
printed every window; --detailed-console traces every chunk and
--log-file-path appends every event to a file.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Environment variables
3. Configuration file
4. Built-in defaults

Environment variables:
  TCP_TRACKER_LISTEN_ADDR      - Listen address (e.g., 0.0.0.0:8080)
  TCP_TRACKER_FORWARD_HOST     - Remote host to relay to
  TCP_TRACKER_FORWARD_PORT     - Remote port to relay to
  TCP_TRACKER_BUFFER_SIZE      - Pump buffer size in bytes
  TCP_TRACKER_CONNECT_TIMEOUT  - Remote connect timeout (e.g., 10s)
  TCP_TRACKER_LOG_FILE         - Event log file path
  TCP_TRACKER_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "tcp-tracker.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    #[arg(long, help = "Port to accept clients on")]
    pub listen_port: Option<u16>,

    #[arg(long, help = "Remote host every client is relayed to")]
    pub forward_to_host: Option<String>,

    #[arg(long, help = "Remote port every client is relayed to")]
    pub forward_to_port: Option<u16>,

    #[arg(long, help = "Append every relay event to this file")]
    pub log_file_path: Option<PathBuf>,

    #[arg(long, help = "Print every relay event to the console")]
    pub detailed_console: bool,

    #[arg(long, help = "Pump buffer size in bytes")]
    pub buffer_size: Option<usize>,

    #[arg(long, value_parser = humantime::parse_duration, help = "Summary window (e.g., 1s, 500ms)")]
    pub summary_window: Option<Duration>,

    #[arg(long, help = "Print window summaries as JSON")]
    pub json_summary: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        Config::default()
    };
    ConfigManager::apply_env(&mut config)?;
    if let Some(log_level) = &args.log_level {
        config.logging.log_level = log_level.clone();
    }

    init_tracing(&args, &config.logging.log_level)?;

    info!("Starting TCP Tracker v{}", env!("CARGO_PKG_VERSION"));

    config.merge_with_cli_args(
        args.listen_port,
        args.forward_to_host.as_deref(),
        args.forward_to_port,
        args.log_file_path.as_deref(),
        args.detailed_console,
        args.buffer_size,
        args.summary_window,
        args.json_summary,
    );

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Listen address: {}", config.server.listen_addr);
        info!("  Forward target: {}", config.forward_target());
        info!("  Connect timeout: {:?}", config.server.connect_timeout);
        info!("  Buffer size: {} bytes", config.server.buffer_size);
        info!(
            "  Summary: {}",
            if config.logging.summary.enabled {
                format!("every {:?}", config.logging.summary.window)
            } else {
                "disabled".to_string()
            }
        );
        info!(
            "  Detailed console: {}",
            if config.logging.console_detail {
                "enabled"
            } else {
                "disabled"
            }
        );
        match &config.logging.file.path {
            Some(path) => info!("  Event log: {}", path.display()),
            None => info!("  Event log: disabled"),
        }
        return Ok(());
    }

    let config = Arc::new(config);
    let counters = Arc::new(ConnectionCounters::new());
    let dispatcher = Arc::new(Dispatcher::new());

    let summary = if config.logging.summary.enabled {
        let summary = Arc::new(SummaryObserver::with_window(
            Arc::clone(&counters),
            config.logging.summary.window,
        ));
        match config.logging.summary.format {
            SummaryFormat::Text => summary.start(StdoutReportSink::text())?,
            SummaryFormat::Json => summary.start(StdoutReportSink::json())?,
        }
        dispatcher.register(summary.clone());
        Some(summary)
    } else {
        info!("Window summaries disabled");
        None
    };

    if config.logging.console_detail {
        dispatcher.register(Arc::new(ConsoleObserver::stdout()));
    }

    let file_log = config.logging.file.path.as_ref().map(|path| {
        info!("Appending relay events to {}", path.display());
        let observer = Arc::new(FileObserver::with_flush_interval(
            path,
            config.logging.file.flush_interval,
        ));
        dispatcher.register(observer.clone());
        observer
    });

    let shutdown_coordinator = ShutdownCoordinator::new(config.server.shutdown_timeout);

    let mut connection_manager = ConnectionManager::new(
        Arc::clone(&config),
        Arc::clone(&dispatcher),
        Arc::clone(&counters),
    );
    connection_manager.bind().await?;
    let connection_manager = Arc::new(connection_manager);

    let server_handle = {
        let manager = Arc::clone(&connection_manager);
        tokio::spawn(async move {
            if let Err(e) = manager.run().await {
                error!("Server error: {:#}", e);
            }
        })
    };

    info!(
        "Relaying {} -> {}",
        config.server.listen_addr,
        config.forward_target()
    );
    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
    }

    info!("Initiating graceful shutdown...");
    if !shutdown_coordinator
        .shutdown(&connection_manager, &dispatcher)
        .await
    {
        warn!("Exiting with sessions still open");
    }

    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Server task failed: {}", e);
        }
    }

    if let Some(summary) = summary {
        summary.join().await;
    }
    if let Some(file_log) = file_log {
        file_log.join().await;
        if let Err(e) = file_log.flush() {
            warn!("Final event log flush failed: {:#}", e);
        }
    }

    info!("Server shutdown complete");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, log_level: &str) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
