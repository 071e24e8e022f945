//! Transport traits for APDU communication with cards
//!
//! This module provides abstractions for communicating with smart cards through
//! different transport mechanisms.

mod error;

use std::fmt;

use bytes::Bytes;
pub use error::TransportError;
use tracing::{debug, trace};

/// Trait for basic card transports
///
/// A transport is responsible for sending and receiving raw APDU bytes.
/// It has no knowledge of command structure or applet protocol details.
pub trait CardTransport: Send + fmt::Debug {
    /// Error type returned by the transport
    type Error: Into<TransportError> + fmt::Debug;

    /// Send raw APDU bytes to card and return response bytes
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Self::Error> {
        trace!(command = %hex::encode(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command);
        match &result {
            Ok(response) => {
                trace!(response = %hex::encode(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit_raw
    /// This is the method that concrete implementations should override
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Self::Error>;

    /// Check if the transport is connected to a physical card
    fn is_connected(&self) -> bool;

    /// Reset the transport connection
    fn reset(&mut self) -> Result<(), Self::Error>;

    /// Release the connection to the card
    ///
    /// Must be idempotent: closing an already closed transport is a no-op.
    fn close(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
