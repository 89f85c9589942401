//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::Mutex;

use tcp_tracker::{Direction, Observer, Result, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected(SessionId, String),
    Data(SessionId, Direction, Vec<u8>),
    Disconnected(SessionId, Direction),
    ShuttingDown,
}

/// Observer that keeps a copy of every event it sees
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Bytes seen in `direction`, concatenated in arrival order
    pub fn payload(&self, direction: Direction) -> Vec<u8> {
        self.chunks(direction).concat()
    }

    pub fn chunks(&self, direction: Direction) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Data(_, dir, bytes) if dir == direction => Some(bytes),
                _ => None,
            })
            .collect()
    }

    pub fn disconnects(&self, direction: Direction) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Disconnected(_, dir) if *dir == direction))
            .count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Observer for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_connected(&self, session: SessionId, peer: &str) -> Result<()> {
        self.push(Event::Connected(session, peer.to_string()));
        Ok(())
    }

    fn on_disconnected(&self, session: SessionId, direction: Direction) -> Result<()> {
        self.push(Event::Disconnected(session, direction));
        Ok(())
    }

    fn on_data(&self, session: SessionId, direction: Direction, payload: &[u8]) -> Result<()> {
        self.push(Event::Data(session, direction, payload.to_vec()));
        Ok(())
    }

    fn on_shutting_down(&self) -> Result<()> {
        self.push(Event::ShuttingDown);
        Ok(())
    }
}
