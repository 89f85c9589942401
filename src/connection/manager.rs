//! Connection Manager Implementation
//!
//! Accepts clients, dials the configured remote host for each one and hands
//! both sockets to a [`RelayExchange`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::observer::Dispatcher;
use crate::relay::RelayExchange;
use crate::stats::ConnectionCounters;
use crate::Result;

/// Accepts client connections and relays each to the forward target
pub struct ConnectionManager {
    listener: Option<TcpListener>,
    config: Arc<Config>,
    dispatcher: Arc<Dispatcher>,
    counters: Arc<ConnectionCounters>,
    active_sessions: Arc<AtomicUsize>,
    total_sessions: Arc<AtomicUsize>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    /// Create a new ConnectionManager
    pub fn new(
        config: Arc<Config>,
        dispatcher: Arc<Dispatcher>,
        counters: Arc<ConnectionCounters>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            listener: None,
            config,
            dispatcher,
            counters,
            active_sessions: Arc::new(AtomicUsize::new(0)),
            total_sessions: Arc::new(AtomicUsize::new(0)),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Bind the listening socket; returns the bound address
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let listen_addr = self.config.server.listen_addr;

        info!("Binding TCP listener to {}", listen_addr);
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", listen_addr))?;
        let bound = listener.local_addr()?;

        info!("Successfully bound to {}", bound);
        self.listener = Some(listener);
        Ok(bound)
    }

    /// Bind if needed and run the accept loop until shutdown
    pub async fn start(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        self.run().await
    }

    /// Main connection acceptance loop
    pub async fn run(&self) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| anyhow!("Listener not initialized"))?;

        info!("Relaying connections to {}", self.config.forward_target());
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.shutdown_flag.load(Ordering::SeqCst) {
                info!("Shutdown flag set, stopping connection acceptance");
                break;
            }

            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!("Accepted connection from {}", addr);

                            // Claimed before the flag check so a concurrent drain either
                            // sees this session or this loop sees the flag
                            let slot = SessionSlot::claim(&self.active_sessions);
                            if self.shutdown_flag.load(Ordering::SeqCst) {
                                debug!("Rejecting connection from {} due to shutdown", addr);
                                continue;
                            }

                            self.spawn_session(stream, addr, slot);
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
            }
        }

        Ok(())
    }

    fn spawn_session(&self, client: TcpStream, addr: SocketAddr, slot: SessionSlot) {
        let config = Arc::clone(&self.config);
        let dispatcher = Arc::clone(&self.dispatcher);
        let counters = Arc::clone(&self.counters);
        let total_sessions = Arc::clone(&self.total_sessions);

        tokio::spawn(async move {
            let remote = match Self::dial(
                &config.server.forward_host,
                config.server.forward_port,
                config.server.connect_timeout,
            )
            .await
            {
                Ok(remote) => remote,
                Err(e) => {
                    warn!("Dropping client {}: {:#}", addr, e);
                    return;
                }
            };

            total_sessions.fetch_add(1, Ordering::Relaxed);
            let started = Instant::now();

            let handle = RelayExchange::from_tcp(dispatcher, counters, client, remote)
                .with_buffer_size(config.server.buffer_size)
                .begin();
            let session = handle.session();

            match handle.join().await {
                Ok((up, down)) => {
                    info!(
                        session = %session,
                        client_addr = %addr,
                        duration_ms = started.elapsed().as_millis() as u64,
                        bytes_up = up.bytes,
                        bytes_down = down.bytes,
                        "Session {} closed ({:?} / {:?})",
                        session,
                        up.reason,
                        down.reason
                    );
                }
                Err(e) => error!("Session {} ended abnormally: {:#}", session, e),
            }

            drop(slot);
        });
    }

    /// Resolve and connect to the configured remote host
    pub async fn connect_to_remote(&self) -> Result<TcpStream> {
        Self::dial(
            &self.config.server.forward_host,
            self.config.server.forward_port,
            self.config.server.connect_timeout,
        )
        .await
    }

    /// Resolve `host:port` and connect to the first address that accepts
    pub async fn dial(host: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
        let addrs = Self::resolve(host, port, connect_timeout)
            .await
            .context("Failed to resolve remote host")?;

        let mut last_error = None;
        for addr in addrs {
            match timeout(connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    debug!("Connected to remote {}", addr);
                    return Ok(stream);
                }
                Ok(Err(e)) => {
                    warn!("Failed to connect to {}: {}", addr, e);
                    last_error = Some(anyhow!("Connection failed: {}", e));
                }
                Err(_) => {
                    warn!("Connection to {} timed out", addr);
                    last_error = Some(anyhow!("Connection timed out"));
                }
            }
        }

        let error_msg = format!("Failed to connect to remote {}:{}", host, port);
        match last_error {
            Some(e) => Err(anyhow!("{}: {}", error_msg, e)),
            None => Err(anyhow!("{}: No addresses resolved", error_msg)),
        }
    }

    async fn resolve(host: &str, port: u16, resolve_timeout: Duration) -> Result<Vec<SocketAddr>> {
        let host_port = format!("{}:{}", host, port);
        let lookup = timeout(resolve_timeout, lookup_host(host_port.as_str())).await;
        match lookup {
            Ok(Ok(addrs)) => {
                let resolved: Vec<SocketAddr> = addrs.collect();
                if resolved.is_empty() {
                    return Err(anyhow!("DNS resolution returned no addresses for {}", host));
                }
                debug!("Resolved {} to {} addresses", host, resolved.len());
                Ok(resolved)
            }
            Ok(Err(e)) => Err(anyhow!("DNS resolution failed for {}: {}", host, e)),
            Err(_) => Err(anyhow!("DNS resolution timed out for {}", host)),
        }
    }

    /// Number of sessions whose pumps are still running
    pub fn get_active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Bound address once `bind` has succeeded
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Get connection statistics
    pub fn get_connection_stats(&self) -> ConnectionStats {
        let sockets = self.counters.snapshot();
        ConnectionStats {
            active_sessions: self.get_active_sessions(),
            total_sessions_served: self.total_sessions.load(Ordering::Relaxed),
            open_inbound: sockets.inbound,
            open_outbound: sockets.outbound,
        }
    }

    /// Stop accepting new clients; running sessions continue
    pub fn initiate_shutdown(&self) {
        info!("Initiating graceful shutdown of connection manager");
        self.shutdown_flag.store(true, Ordering::SeqCst);

        if self.shutdown_tx.send(()).is_err() {
            debug!("Accept loop not running, no shutdown receivers");
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Wait for live sessions, including ones still dialing, to finish.
    /// Sessions are never force-closed; gives up after `shutdown_timeout`.
    pub async fn wait_for_sessions_to_close(&self, shutdown_timeout: Duration) -> bool {
        let start_time = Instant::now();

        info!(
            "Waiting for {} active sessions to close (timeout: {:?})",
            self.get_active_sessions(),
            shutdown_timeout
        );

        let mut last_count = self.get_active_sessions();
        while last_count > 0 && start_time.elapsed() < shutdown_timeout {
            tokio::time::sleep(Duration::from_millis(50)).await;

            let current_count = self.get_active_sessions();
            if current_count != last_count {
                debug!("Active sessions: {} -> {}", last_count, current_count);
                last_count = current_count;
            }
        }

        let remaining = self.get_active_sessions();
        let elapsed = start_time.elapsed();

        if remaining == 0 {
            info!("All sessions closed gracefully in {:?}", elapsed);
            true
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} sessions still active",
                elapsed, remaining
            );
            false
        }
    }
}

/// Counts one accepted client as live until dropped
struct SessionSlot(Arc<AtomicUsize>);

impl SessionSlot {
    fn claim(active_sessions: &Arc<AtomicUsize>) -> Self {
        active_sessions.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(active_sessions))
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Connection statistics
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub active_sessions: usize,
    pub total_sessions_served: usize,
    pub open_inbound: i64,
    pub open_outbound: i64,
}
