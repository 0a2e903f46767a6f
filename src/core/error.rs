use std::io;
use thiserror::Error;

use super::types::MacAddress;

/// Custom error types for the radiator link
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame too short: {len} bytes, header needs {header}")]
    FrameTooShort { len: usize, header: usize },

    #[error("Bad frame magic: {found:#06x}")]
    BadMagic { found: u16 },

    #[error("Frame length mismatch: header declares {declared}, received {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Payload too large: {len} bytes, max {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("{table} is full ({capacity} entries)")]
    CapacityExceeded { table: &'static str, capacity: usize },

    #[error("No entry at index {0}")]
    InvalidIndex(usize),

    #[error("Destination {0} is not registered")]
    UnknownDestination(MacAddress),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Record encoding error: {0}")]
    Record(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad command: {0}")]
    Command(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new bad command error
    pub fn command(msg: impl Into<String>) -> Self {
        Error::Command(msg.into())
    }

    /// Creates a new invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a capacity error for the named table
    pub fn capacity(table: &'static str, capacity: usize) -> Self {
        Error::CapacityExceeded { table, capacity }
    }

    /// Returns true for errors raised while validating inbound frames
    pub fn is_malformed_frame(&self) -> bool {
        matches!(
            self,
            Error::FrameTooShort { .. } | Error::BadMagic { .. } | Error::LengthMismatch { .. }
        )
    }
}
