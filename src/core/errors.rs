// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::num::ParseIntError;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures between a caller and the device.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum FurbyError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// No matching notification arrived before the deadline of a correlated send.
    #[error("Timed out after {0:?} waiting for a response")]
    Timeout(std::time::Duration),

    /// The underlying characteristic write failed (e.g. the link dropped).
    #[error("Transport write failed: {0}")]
    TransportWrite(String),

    /// Any other transport failure (scan, connect, subscribe, disconnect).
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation not allowed in the current state: {0}")]
    InvalidState(String),

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The expectation was withdrawn before a frame could complete it.
    #[error("Response expectation was cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for FurbyError {
    fn clone(&self) -> Self {
        match self {
            FurbyError::Io(e) => FurbyError::Io(Arc::clone(e)),
            FurbyError::Timeout(d) => FurbyError::Timeout(*d),
            FurbyError::TransportWrite(s) => FurbyError::TransportWrite(s.clone()),
            FurbyError::Transport(s) => FurbyError::Transport(s.clone()),
            FurbyError::InvalidState(s) => FurbyError::InvalidState(s.clone()),
            FurbyError::UnknownCommand(s) => FurbyError::UnknownCommand(s.clone()),
            FurbyError::InvalidArgument(s) => FurbyError::InvalidArgument(s.clone()),
            FurbyError::Cancelled => FurbyError::Cancelled,
            FurbyError::Config(s) => FurbyError::Config(s.clone()),
        }
    }
}

impl PartialEq for FurbyError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FurbyError::Io(e1), FurbyError::Io(e2)) => e1.to_string() == e2.to_string(),
            (FurbyError::Timeout(d1), FurbyError::Timeout(d2)) => d1 == d2,
            (FurbyError::TransportWrite(s1), FurbyError::TransportWrite(s2)) => s1 == s2,
            (FurbyError::Transport(s1), FurbyError::Transport(s2)) => s1 == s2,
            (FurbyError::InvalidState(s1), FurbyError::InvalidState(s2)) => s1 == s2,
            (FurbyError::UnknownCommand(s1), FurbyError::UnknownCommand(s2)) => s1 == s2,
            (FurbyError::InvalidArgument(s1), FurbyError::InvalidArgument(s2)) => s1 == s2,
            (FurbyError::Config(s1), FurbyError::Config(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl FurbyError {
    /// Returns true for failures a caller can shrug off while staying connected.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FurbyError::Timeout(_)
                | FurbyError::Cancelled
                | FurbyError::InvalidArgument(_)
                | FurbyError::UnknownCommand(_)
        )
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for FurbyError {
    fn from(e: std::io::Error) -> Self {
        FurbyError::Io(Arc::new(e))
    }
}

impl From<btleplug::Error> for FurbyError {
    fn from(e: btleplug::Error) -> Self {
        FurbyError::Transport(e.to_string())
    }
}

impl From<ParseIntError> for FurbyError {
    fn from(e: ParseIntError) -> Self {
        FurbyError::InvalidArgument(e.to_string())
    }
}

impl From<serde_json::Error> for FurbyError {
    fn from(e: serde_json::Error) -> Self {
        FurbyError::Config(format!("JSON deserialization error: {e}"))
    }
}
