//! Core traits and types for APDU (Application Protocol Data Unit) operations
//!
//! This crate provides the foundational types and traits for working with smart card
//! APDU commands and responses according to ISO/IEC 7816-4.
//!
//! ## Overview
//!
//! - Creating and parsing APDU commands and responses
//! - Communicating with smart cards through pluggable transports
//! - Error handling and status word interpretation
//!
//! Applet-specific command sets are built on top of [`ApduCommand`], and are
//! executed through a [`CardExecutor`] that owns the transport.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod executor;
pub mod response;
pub mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

mod error;
pub use error::{Error, Result, ResultExt};

pub use command::{ApduCommand, Command, CommandError, ExpectedLength, MAX_DATA_LENGTH};
pub use executor::CardExecutor;
pub use response::error::{ResponseError, StatusError};
pub use response::status::StatusWord;
pub use response::{ApduResponse, Response, utils};
pub use transport::{CardTransport, TransportError};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Bytes, BytesMut, CardExecutor, Command, Error, Response, ResponseError, Result,
        command::ApduCommand,
        response::ApduResponse,
        response::status::{StatusWord, common as status},
        transport::{CardTransport, TransportError},
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports() {
        let cmd = Command::new(0xB0, 0x3C, 0x00, 0x00);
        assert_eq!(cmd.class(), 0xB0);
        assert_eq!(cmd.instruction(), 0x3C);
        assert_eq!(cmd.p1(), 0x00);
        assert_eq!(cmd.p2(), 0x00);

        let data = Bytes::from_static(&[0x00, 0x0C, 0x00, 0x05]);
        let resp = Response::success(Some(data.clone()));
        assert!(resp.is_success());
        assert_eq!(resp.payload(), &Some(data));
        assert_eq!(resp.status(), StatusWord::new(0x90, 0x00));
    }
}
