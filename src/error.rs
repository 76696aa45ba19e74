//! Error kinds for the medium simulator.
//!
//! Mirrors the five failure classes the daemon distinguishes: configuration
//! errors abort startup, everything else is logged and the offending frame
//! or client is dropped without retry — simulated time must keep moving.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("allocation error: {0}")]
    Allocation(String),

    #[error("lookup error: {0}")]
    Lookup(String),
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        SimError::Config(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        SimError::Protocol(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        SimError::Transport(msg.into())
    }

    pub fn lookup(msg: impl Into<String>) -> Self {
        SimError::Lookup(msg.into())
    }

    /// Whether this kind is fatal for the whole process (only configuration is).
    pub fn is_fatal(&self) -> bool {
        matches!(self, SimError::Config(_))
    }
}
