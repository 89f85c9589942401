//! Session identity and relay direction

use std::fmt;
use uuid::Uuid;

/// Opaque handle identifying one relay session for the lifetime of both its sockets.
///
/// Identities are random (UUID v4) and never reused, so observers can use them
/// as grouping keys without worrying about a closed session's id resurfacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a fresh session identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Eight hex digit form used in log lines
    pub fn short(&self) -> String {
        let simple = self.0.simple().to_string();
        simple[..8].to_uppercase()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

/// One of the two half-duplex flows inside a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Bytes read from the accepted client and written to the remote host
    ClientToRemote,
    /// Bytes read from the remote host and written back to the client
    RemoteToClient,
}

impl Direction {
    /// Single letter code used by the text observers
    pub fn short_code(&self) -> &'static str {
        match self {
            Direction::ClientToRemote => "C",
            Direction::RemoteToClient => "R",
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::ClientToRemote => Direction::RemoteToClient,
            Direction::RemoteToClient => Direction::ClientToRemote,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Direction::ClientToRemote => 0,
            Direction::RemoteToClient => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToRemote => write!(f, "client->remote"),
            Direction::RemoteToClient => write!(f, "remote->client"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_session_ids_are_unique() {
        let ids: HashSet<SessionId> = (0..1000).map(|_| SessionId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_short_form() {
        let id = SessionId::new();
        let short = id.short();
        assert_eq!(short.len(), 8);
        assert!(short.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_eq!(id.to_string(), short);
    }

    #[test]
    fn test_direction_codes() {
        assert_eq!(Direction::ClientToRemote.short_code(), "C");
        assert_eq!(Direction::RemoteToClient.short_code(), "R");
        assert_eq!(Direction::ClientToRemote.opposite(), Direction::RemoteToClient);
        assert_ne!(Direction::ClientToRemote.index(), Direction::RemoteToClient.index());
    }
}
