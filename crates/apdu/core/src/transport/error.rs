//! Error types specific to card transport

use thiserror::Error;

/// Transport error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection error
    #[error("Failed to connect to device")]
    Connection,

    /// Transmission error
    #[error("Failed to transmit data")]
    Transmission,

    /// The card was removed or reset underneath the session
    #[error("Card removed or reset")]
    CardRemoved,

    /// Device error
    #[error("Device error")]
    Device,

    /// Buffer too small
    #[error("Buffer too small")]
    BufferTooSmall,

    /// Driver error (with code)
    #[error("Driver error code: {0}")]
    Driver(i32),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Cancelled operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Other error with message
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a new driver error
    pub const fn driver(code: i32) -> Self {
        Self::Driver(code)
    }

    /// Create a general other error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }
}
