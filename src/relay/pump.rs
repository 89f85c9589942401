//! Directional pump
//!
//! Copies one direction of a session chunk by chunk:
//! `Reading -> Writing -> Reading -> ... -> Closed`.

use std::io;
use std::sync::Arc;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use super::link::SessionLink;
use crate::observer::Dispatcher;
use crate::session::{Direction, SessionId};
use crate::stats::ConnectionCounters;

/// Why a pump reached `Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The source returned end-of-stream
    PeerClosed,
    /// Reading the source failed
    ReadFault(io::ErrorKind),
    /// Writing the destination failed
    WriteFault(io::ErrorKind),
    /// One of the two sockets was already gone at a transition
    SocketGone,
}

/// Outcome of one pump
#[derive(Debug, Clone)]
pub struct PumpReport {
    pub direction: Direction,
    /// Number of chunks read and forwarded
    pub chunks: u64,
    pub bytes: u64,
    pub reason: CloseReason,
}

#[derive(Debug)]
enum PumpState {
    Reading,
    Writing(usize),
    Closed(CloseReason),
}

pub(crate) struct Pump<R, W> {
    pub(crate) session: SessionId,
    pub(crate) direction: Direction,
    pub(crate) reader: R,
    pub(crate) writer: W,
    pub(crate) link: Arc<SessionLink>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) counters: Arc<ConnectionCounters>,
    pub(crate) buffer_size: usize,
}

impl<R, W> Pump<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub(crate) async fn run(mut self) -> PumpReport {
        let mut buf = BytesMut::zeroed(self.buffer_size.max(1));
        let mut chunks = 0u64;
        let mut bytes = 0u64;
        let mut state = PumpState::Reading;

        let reason = loop {
            state = match state {
                PumpState::Reading => self.read(&mut buf).await,
                PumpState::Writing(len) => {
                    let next = self.write(&buf[..len]).await;
                    if matches!(next, PumpState::Reading) {
                        chunks += 1;
                        bytes += len as u64;
                    }
                    next
                }
                PumpState::Closed(reason) => break reason,
            };
        };

        self.close(reason).await;

        PumpReport {
            direction: self.direction,
            chunks,
            bytes,
            reason,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> PumpState {
        let link = Arc::clone(&self.link);
        let source = link.source(self.direction);
        let destination = link.destination(self.direction);

        if !source.is_connected() || !destination.is_connected() {
            return PumpState::Closed(CloseReason::SocketGone);
        }

        let result = tokio::select! {
            biased;
            _ = source.gone() => return PumpState::Closed(CloseReason::SocketGone),
            _ = destination.gone() => return PumpState::Closed(CloseReason::SocketGone),
            result = self.reader.read(buf) => result,
        };

        match result {
            Ok(0) => PumpState::Closed(CloseReason::PeerClosed),
            Ok(n) => {
                if !destination.is_connected() {
                    return PumpState::Closed(CloseReason::SocketGone);
                }
                trace!(session = %self.session, direction = %self.direction, bytes = n, "Read chunk");
                self.dispatcher.data(self.session, self.direction, &buf[..n]);
                PumpState::Writing(n)
            }
            Err(e) => {
                debug!(session = %self.session, direction = %self.direction, "Read failed: {}", e);
                source.mark_gone();
                PumpState::Closed(CloseReason::ReadFault(e.kind()))
            }
        }
    }

    async fn write(&mut self, payload: &[u8]) -> PumpState {
        let link = Arc::clone(&self.link);
        let destination = link.destination(self.direction);

        if !destination.is_connected() {
            return PumpState::Closed(CloseReason::SocketGone);
        }

        let writer = &mut self.writer;
        let result = tokio::select! {
            biased;
            _ = destination.gone() => return PumpState::Closed(CloseReason::SocketGone),
            result = async {
                match writer.write_all(payload).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                }
            } => result,
        };

        match result {
            Ok(()) => PumpState::Reading,
            Err(e) => {
                debug!(session = %self.session, direction = %self.direction, "Write failed: {}", e);
                destination.mark_gone();
                PumpState::Closed(CloseReason::WriteFault(e.kind()))
            }
        }
    }

    async fn close(&mut self, reason: CloseReason) {
        if self.link.mark_disconnected(self.direction) {
            self.dispatcher.disconnected(self.session, self.direction);
            self.counters.direction_closed(self.direction);
        }

        // Half-close so the peer sees end-of-stream while the opposite pump
        // may still be reading the same socket.
        if reason == CloseReason::PeerClosed && self.link.destination(self.direction).is_connected() {
            if let Err(e) = self.writer.shutdown().await {
                debug!(session = %self.session, direction = %self.direction, "Half-close failed: {}", e);
            }
        }

        debug!(session = %self.session, direction = %self.direction, ?reason, "Pump closed");
    }
}
