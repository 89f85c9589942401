//! Connection Management Module
//!
//! Handles client acceptance, remote dialing, and session lifecycle.

pub mod manager;

pub use manager::{ConnectionManager, ConnectionStats};
