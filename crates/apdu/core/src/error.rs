//! Core error type for all APDU operations
//!
//! Transport, response and command failures are kept as separate enums and
//! folded into [`Error`] so applet crates can classify a failure after it has
//! bubbled up through the executor.

use crate::command::CommandError;
use crate::response::error::ResponseError;
use crate::transport::TransportError;

/// Result type for APDU operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type that encompasses all possible errors in the crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The card could not be reached or the link dropped
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The card answered with something that could not be interpreted
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// A command could not be built or encoded
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers and return the innermost error
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the innermost error is a transport failure
    pub fn is_transport(&self) -> bool {
        matches!(self.root(), Self::Transport(_))
    }
}

/// Extension trait for Result with APDU Errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context<S: Into<String>>(self, context: S) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
