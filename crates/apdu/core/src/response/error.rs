//! Error types specific to APDU responses

use thiserror::Error;

use super::status::StatusWord;

/// Error for status words in APDU responses
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Status error {status} ({})", status.description())]
pub struct StatusError {
    /// Status word that caused the error
    pub status: StatusWord,
}

impl StatusError {
    /// Create a new status error
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self {
            status: StatusWord::new(sw1, sw2),
        }
    }

    /// Get the status word
    pub const fn status_word(&self) -> StatusWord {
        self.status
    }
}

/// Error for APDU response processing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// Incomplete response (less than 2 bytes)
    #[error("Incomplete response")]
    Incomplete,

    /// Payload did not match the expected layout
    #[error("Parse error: {0}")]
    Parse(&'static str),

    /// Payload shorter than announced by a length prefix
    #[error("Truncated payload: needed {needed} bytes, got {available}")]
    Truncated {
        /// Bytes required by the layout
        needed: usize,
        /// Bytes actually present
        available: usize,
    },

    /// Status error
    #[error(transparent)]
    Status(#[from] StatusError),

    /// Status word error with custom message
    #[error("Response error: {0}")]
    Message(String),
}

impl ResponseError {
    /// Create a new status error
    pub const fn status(sw1: u8, sw2: u8) -> Self {
        Self::Status(StatusError::new(sw1, sw2))
    }

    /// Create a parse error with a message
    pub const fn parse(message: &'static str) -> Self {
        Self::Parse(message)
    }

    /// Check if this error has the given status word
    pub const fn has_status(&self, sw: u16) -> bool {
        if let Self::Status(status_error) = self {
            status_error.status_word().to_u16() == sw
        } else {
            false
        }
    }

    /// Create a message error
    pub fn message<S: Into<String>>(message: S) -> Self {
        Self::Message(message.into())
    }
}
