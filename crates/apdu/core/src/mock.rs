//! Scripted in-memory transport
//!
//! Responses are handed out in order; once the script runs dry every further
//! exchange fails with [`TransportError::Transmission`], which is how tests
//! simulate a card being pulled mid-flow.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::transport::{CardTransport, TransportError};

/// Transport that replays a fixed script of responses
#[derive(Debug, Clone)]
pub struct MockTransport {
    responses: VecDeque<Result<Bytes, TransportError>>,
    commands: Vec<Bytes>,
    connected: bool,
    closed: usize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MockTransport {
    /// Create a new mock transport with the given responses
    pub fn new(responses: Vec<Bytes>) -> Self {
        Self {
            responses: responses.into_iter().map(Ok).collect(),
            commands: Vec::new(),
            connected: true,
            closed: 0,
        }
    }

    /// Create a transport whose script starts with `90 00`
    pub fn with_success() -> Self {
        Self::new(vec![Bytes::from_static(&[0x90, 0x00])])
    }

    /// Append a response built from payload and status word
    pub fn push_response(&mut self, payload: &[u8], sw: u16) -> &mut Self {
        let mut raw = payload.to_vec();
        raw.extend_from_slice(&sw.to_be_bytes());
        self.responses.push_back(Ok(Bytes::from(raw)));
        self
    }

    /// Append a transport failure to the script
    pub fn push_error(&mut self, error: TransportError) -> &mut Self {
        self.responses.push_back(Err(error));
        self
    }

    /// Commands sent so far
    pub fn commands(&self) -> &[Bytes] {
        &self.commands
    }

    /// Number of unconsumed scripted responses
    pub fn pending(&self) -> usize {
        self.responses.len()
    }

    /// How many times `close` was called on a connected transport
    pub const fn close_count(&self) -> usize {
        self.closed
    }
}

impl CardTransport for MockTransport {
    type Error = TransportError;

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Self::Error> {
        if !self.connected {
            return Err(TransportError::Connection);
        }

        self.commands.push(Bytes::copy_from_slice(command));
        self.responses
            .pop_front()
            .unwrap_or(Err(TransportError::Transmission))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        if self.connected {
            self.connected = false;
            self.closed += 1;
        }
        Ok(())
    }
}
