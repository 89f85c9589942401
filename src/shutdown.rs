//! Graceful Shutdown Handling
//!
//! Waits for SIGTERM / SIGINT, stops the acceptor, drains running sessions
//! and finally tells the observers to stop.

use std::time::Duration;
use tokio::signal;
use tracing::info;

use crate::connection::ConnectionManager;
use crate::observer::Dispatcher;
use crate::Result;

/// Orders the shutdown of the acceptor, the sessions and the observers
pub struct ShutdownCoordinator {
    /// How long to wait for sessions to drain
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Resolve once SIGTERM, SIGINT or Ctrl+C arrives
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        Ok(())
    }

    /// Stop accepting, wait for sessions to drain, then shut the observers
    /// down. Returns whether every session closed within the timeout.
    pub async fn shutdown(&self, connection_manager: &ConnectionManager, dispatcher: &Dispatcher) -> bool {
        connection_manager.initiate_shutdown();
        let drained = connection_manager.wait_for_sessions_to_close(self.timeout).await;

        if dispatcher.shutdown() {
            info!("Observers shut down");
        }
        drained
    }
}
