//! Per-event console logging

use std::io::{self, Write};
use std::sync::Mutex;
use anyhow::anyhow;
use chrono::Local;

use super::{format, Observer};
use crate::session::{Direction, SessionId};
use crate::Result;

/// Writes one line per event to a console stream (stdout by default)
pub struct ConsoleObserver {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleObserver {
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }

    fn write_line(&self, session: SessionId, direction: Direction, info: &str) -> Result<()> {
        let line = format::console_line(Local::now(), session, direction, info);
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow!("console writer lock poisoned"))?;
        writeln!(out, "{}", line)?;
        Ok(())
    }
}

impl Observer for ConsoleObserver {
    fn name(&self) -> &str {
        "console"
    }

    fn on_connected(&self, session: SessionId, peer: &str) -> Result<()> {
        self.write_line(session, Direction::ClientToRemote, &format::connected_info(peer))
    }

    fn on_disconnected(&self, session: SessionId, direction: Direction) -> Result<()> {
        self.write_line(session, direction, format::DISCONNECTED_INFO)
    }

    fn on_data(&self, session: SessionId, direction: Direction, payload: &[u8]) -> Result<()> {
        self.write_line(session, direction, &format::hex(payload))
    }

    fn on_shutting_down(&self) -> Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow!("console writer lock poisoned"))?;
        out.flush()?;
        Ok(())
    }
}
