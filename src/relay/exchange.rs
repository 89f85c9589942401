//! Relay Exchange

use std::sync::Arc;
use anyhow::anyhow;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::link::SessionLink;
use super::pump::{Pump, PumpReport};
use crate::observer::Dispatcher;
use crate::session::{Direction, SessionId};
use crate::stats::ConnectionCounters;
use crate::Result;

/// Default pump buffer size in bytes.
///
/// Every read produces one data event, so this also sets the granularity
/// observers see. Smaller buffers give finer summaries at a higher per-byte cost.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Owns the client and remote sockets of one session and relays between them.
///
/// Works over any bidirectional byte stream. Construct it with two
/// already-connected streams, then call [`RelayExchange::begin`].
pub struct RelayExchange<C, R> {
    session: SessionId,
    peer: String,
    client: C,
    remote: R,
    dispatcher: Arc<Dispatcher>,
    counters: Arc<ConnectionCounters>,
    buffer_size: usize,
}

impl<C, R> RelayExchange<C, R>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    /// `peer` describes the client endpoint for the connected event
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        counters: Arc<ConnectionCounters>,
        client: C,
        remote: R,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            session: SessionId::new(),
            peer: peer.into(),
            client,
            remote,
            dispatcher,
            counters,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Override the pump buffer size (minimum 1 byte)
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Start both pumps and return immediately.
    ///
    /// The connected event is dispatched before either pump runs, so it
    /// precedes every data and disconnect event of this session. Must be
    /// called from within a tokio runtime.
    pub fn begin(self) -> RelayHandle {
        let session = self.session;

        self.counters.session_opened();
        self.dispatcher.connected(session, &self.peer);
        info!("Session {} started for client {}", session, self.peer);

        let link = Arc::new(SessionLink::new());
        let (client_read, client_write) = tokio::io::split(self.client);
        let (remote_read, remote_write) = tokio::io::split(self.remote);

        let client_to_remote = Pump {
            session,
            direction: Direction::ClientToRemote,
            reader: client_read,
            writer: remote_write,
            link: Arc::clone(&link),
            dispatcher: Arc::clone(&self.dispatcher),
            counters: Arc::clone(&self.counters),
            buffer_size: self.buffer_size,
        };
        let remote_to_client = Pump {
            session,
            direction: Direction::RemoteToClient,
            reader: remote_read,
            writer: client_write,
            link,
            dispatcher: self.dispatcher,
            counters: self.counters,
            buffer_size: self.buffer_size,
        };

        debug!("Session {} pumps starting with {} byte buffers", session, self.buffer_size);

        RelayHandle {
            session,
            client_to_remote: tokio::spawn(client_to_remote.run()),
            remote_to_client: tokio::spawn(remote_to_client.run()),
        }
    }
}

impl RelayExchange<TcpStream, TcpStream> {
    /// Build an exchange from an accepted client and a connected remote socket
    pub fn from_tcp(
        dispatcher: Arc<Dispatcher>,
        counters: Arc<ConnectionCounters>,
        client: TcpStream,
        remote: TcpStream,
    ) -> Self {
        let peer = client
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self::new(dispatcher, counters, client, remote, peer)
    }
}

/// Handle to a running session
pub struct RelayHandle {
    session: SessionId,
    client_to_remote: JoinHandle<PumpReport>,
    remote_to_client: JoinHandle<PumpReport>,
}

impl RelayHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Both pumps have reached `Closed`
    pub fn is_finished(&self) -> bool {
        self.client_to_remote.is_finished() && self.remote_to_client.is_finished()
    }

    /// Wait for both pumps; returns the client->remote report first
    pub async fn join(self) -> Result<(PumpReport, PumpReport)> {
        let client_to_remote = self
            .client_to_remote
            .await
            .map_err(|e| anyhow!("client->remote pump of session {} failed: {}", self.session, e))?;
        let remote_to_client = self
            .remote_to_client
            .await
            .map_err(|e| anyhow!("remote->client pump of session {} failed: {}", self.session, e))?;
        Ok((client_to_remote, remote_to_client))
    }
}
