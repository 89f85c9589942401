//! Text rendering shared by the console and file observers

use chrono::{DateTime, Local};

use crate::session::{Direction, SessionId};

/// Upper-case hex pairs separated by single spaces
pub fn hex(payload: &[u8]) -> String {
    payload
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Printable rendering, one character per byte read as Latin-1; control
/// characters, whitespace, DEL, the C1 range and NBSP become '.'
pub fn printable(payload: &[u8]) -> String {
    payload
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b >= 0xA1 {
                char::from(b).to_string()
            } else {
                ".".to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn connected_info(peer: &str) -> String {
    format!("Client Connected from {}", peer)
}

pub const DISCONNECTED_INFO: &str = "Disconnected";

/// `HH:MM:SS.ff <session> <dir> <info>`
pub fn console_line(at: DateTime<Local>, session: SessionId, direction: Direction, info: &str) -> String {
    format!(
        "{}.{:02} {} {} {}",
        at.format("%H:%M:%S"),
        at.timestamp_subsec_millis() / 10,
        session.short(),
        direction.short_code(),
        info
    )
}

/// `YYYY-MM-DD HH:MM:SS <session> <dir>+ <info>`
pub fn file_line(at: DateTime<Local>, session: SessionId, direction: Direction, info: &str) -> String {
    format!(
        "{} {} {}+ {}",
        at.format("%Y-%m-%d %H:%M:%S"),
        session.short(),
        direction.short_code(),
        info
    )
}

/// Payload rendering used in the persistent log: hex, three spaces, characters
pub fn file_payload(payload: &[u8]) -> String {
    format!("{}   {}", hex(payload), printable(payload))
}
