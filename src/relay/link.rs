//! Shared per-session socket state
//!
//! The two pumps of a session each own half of both sockets, so neither can
//! see the other's failures directly. A `SessionLink` carries that knowledge.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

use crate::session::Direction;

/// Liveness of one socket as seen by both pumps
#[derive(Debug)]
pub(crate) struct SocketState {
    gone_tx: watch::Sender<bool>,
}

impl SocketState {
    fn new() -> Self {
        let (gone_tx, _) = watch::channel(false);
        Self { gone_tx }
    }

    pub(crate) fn is_connected(&self) -> bool {
        !*self.gone_tx.borrow()
    }

    /// Record a fault on this socket. Returns true for the first caller.
    pub(crate) fn mark_gone(&self) -> bool {
        !self.gone_tx.send_replace(true)
    }

    /// Resolves once the socket has been marked gone
    pub(crate) async fn gone(&self) {
        let mut rx = self.gone_tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct SessionLink {
    client: SocketState,
    remote: SocketState,
    disconnected: [AtomicBool; 2],
}

impl SessionLink {
    pub(crate) fn new() -> Self {
        Self {
            client: SocketState::new(),
            remote: SocketState::new(),
            disconnected: [AtomicBool::new(false), AtomicBool::new(false)],
        }
    }

    /// Socket the pump for `direction` reads from
    pub(crate) fn source(&self, direction: Direction) -> &SocketState {
        match direction {
            Direction::ClientToRemote => &self.client,
            Direction::RemoteToClient => &self.remote,
        }
    }

    /// Socket the pump for `direction` writes to
    pub(crate) fn destination(&self, direction: Direction) -> &SocketState {
        self.source(direction.opposite())
    }

    /// Claim the right to report `direction` as disconnected; true only once
    pub(crate) fn mark_disconnected(&self, direction: Direction) -> bool {
        !self.disconnected[direction.index()].swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_source_and_destination() {
        let link = SessionLink::new();
        assert!(std::ptr::eq(link.source(Direction::ClientToRemote), &link.client));
        assert!(std::ptr::eq(link.destination(Direction::ClientToRemote), &link.remote));
        assert!(std::ptr::eq(link.source(Direction::RemoteToClient), &link.remote));
        assert!(std::ptr::eq(link.destination(Direction::RemoteToClient), &link.client));
    }

    #[test]
    fn test_disconnect_claimed_once() {
        let link = SessionLink::new();
        assert!(link.mark_disconnected(Direction::ClientToRemote));
        assert!(!link.mark_disconnected(Direction::ClientToRemote));
        assert!(link.mark_disconnected(Direction::RemoteToClient));
        assert!(!link.mark_disconnected(Direction::RemoteToClient));
    }

    #[test]
    fn test_mark_gone_once() {
        let link = SessionLink::new();
        let client = link.source(Direction::ClientToRemote);
        assert!(client.is_connected());
        assert!(client.mark_gone());
        assert!(!client.mark_gone());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_gone_wakes_waiter() {
        let link = Arc::new(SessionLink::new());
        let waiter = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.source(Direction::RemoteToClient).gone().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        link.source(Direction::RemoteToClient).mark_gone();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
    }

    #[tokio::test]
    async fn test_gone_resolves_when_already_marked() {
        let link = SessionLink::new();
        link.destination(Direction::RemoteToClient).mark_gone();
        tokio::time::timeout(Duration::from_secs(1), link.source(Direction::ClientToRemote).gone())
            .await
            .expect("already gone");
    }
}
