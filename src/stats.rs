//! Process-wide connection counters

use std::sync::atomic::{AtomicI64, Ordering};
use serde::Serialize;

use crate::session::Direction;

/// Tracks currently open inbound (client) and outbound (remote) sockets.
///
/// Written only by the relay: one increment of both counters when a session
/// begins, one decrement per direction when that direction's pump closes.
/// Observers read it.
#[derive(Debug, Default)]
pub struct ConnectionCounters {
    inbound: AtomicI64,
    outbound: AtomicI64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CounterSnapshot {
    pub inbound: i64,
    pub outbound: i64,
}

impl ConnectionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Both sockets of a new session count together
    pub fn session_opened(&self) {
        self.inbound.fetch_add(1, Ordering::Relaxed);
        self.outbound.fetch_add(1, Ordering::Relaxed);
    }

    /// The client->remote pump stops reading the client socket, the
    /// remote->client pump stops reading the remote socket.
    pub fn direction_closed(&self, direction: Direction) {
        match direction {
            Direction::ClientToRemote => self.inbound.fetch_sub(1, Ordering::Relaxed),
            Direction::RemoteToClient => self.outbound.fetch_sub(1, Ordering::Relaxed),
        };
    }

    pub fn inbound(&self) -> i64 {
        self.inbound.load(Ordering::Relaxed)
    }

    pub fn outbound(&self) -> i64 {
        self.outbound.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            inbound: self.inbound(),
            outbound: self.outbound(),
        }
    }
}
