//! Error types specific to APDU commands

use thiserror::Error;

/// Error for APDU command processing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Invalid command length
    #[error("Invalid command length: {0}")]
    InvalidLength(usize),

    /// Data too long for a short APDU
    #[error("Data too long: {0} bytes (max {1})")]
    DataTooLong(usize, usize),

    /// Invalid parameter supplied by the caller
    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),
}

impl CommandError {
    /// Create a data too long error
    pub const fn data_too_long(actual: usize, max: usize) -> Self {
        Self::DataTooLong(actual, max)
    }
}
