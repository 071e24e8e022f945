//! Card executor implementation
//!
//! The executor owns a transport and turns typed [`ApduCommand`]s into raw
//! exchanges, handing the parsed [`Response`] back to the command so it can
//! produce its own tagged result.

use bytes::Bytes;
use tracing::{debug, event, trace};

use crate::command::ApduCommand;
use crate::response::ApduResponse;
use crate::transport::{CardTransport, TransportError};
use crate::{Error, Response};

/// Executes commands over a [`CardTransport`]
#[derive(Debug)]
pub struct CardExecutor<T: CardTransport> {
    /// The transport used for communication
    transport: T,
    /// The last raw response received
    last_response: Option<Bytes>,
    /// Number of APDUs exchanged so far
    exchanges: u64,
}

impl<T: CardTransport> CardExecutor<T> {
    /// Create a new card executor with the given transport
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            last_response: None,
            exchanges: 0,
        }
    }

    /// Get a reference to the transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the transport
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the executor and hand back the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Get the last response received
    pub const fn last_response_bytes(&self) -> Option<&Bytes> {
        self.last_response.as_ref()
    }

    /// Number of APDUs exchanged over this executor
    pub const fn exchanges(&self) -> u64 {
        self.exchanges
    }

    /// Send raw bytes and return the raw response, status word included
    pub fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        self.exchanges += 1;
        let response = self
            .transport
            .transmit_raw(command)
            .map_err(|e| Error::Transport(e.into()))?;
        self.last_response = Some(response.clone());
        Ok(response)
    }

    /// Execute a typed command and parse its response
    pub fn execute<C: ApduCommand>(&mut self, command: &C) -> Result<C::Success, C::Error> {
        let bytes = command
            .to_bytes()
            .map_err(|e| C::convert_error(e.into()))?;
        trace!(
            cla = format_args!("{:#04x}", command.class()),
            ins = format_args!("{:#04x}", command.instruction()),
            p1 = format_args!("{:#04x}", command.p1()),
            p2 = format_args!("{:#04x}", command.p2()),
            "Executing command"
        );

        let raw = self.transmit_raw(&bytes).map_err(C::convert_error)?;
        let response = Response::from_bytes(&raw).map_err(|e| C::convert_error(e.into()))?;

        let status = response.status();
        match status.tracing_level() {
            tracing::Level::DEBUG => {
                event!(
                    tracing::Level::DEBUG,
                    ins = command.instruction(),
                    %status,
                    "Card responded"
                )
            }
            tracing::Level::INFO => {
                event!(tracing::Level::INFO, ins = command.instruction(), %status, "Card responded")
            }
            _ => {
                event!(
                    tracing::Level::WARN,
                    ins = command.instruction(),
                    %status,
                    description = status.description(),
                    "Card responded"
                )
            }
        }

        C::parse_response(response)
    }

    /// Reset the underlying transport
    pub fn reset(&mut self) -> Result<(), Error> {
        debug!("Resetting transport");
        self.last_response = None;
        self.transport
            .reset()
            .map_err(|e| Error::Transport(e.into()))
    }

    /// Close the underlying transport
    pub fn close(&mut self) -> Result<(), TransportError> {
        self.last_response = None;
        self.transport.close().map_err(Into::into)
    }
}
