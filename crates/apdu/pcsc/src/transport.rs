//! PC/SC transport implementation

use std::{ffi::CString, fmt};

use pcsc::{Card, Context, Disposition, MAX_BUFFER_SIZE};
use satochip_apdu_core::{Bytes, CardTransport};
use tracing::{debug, warn};

use crate::{config::PcscConfig, error::PcscError};

/// Transport implementation using PC/SC
pub struct PcscTransport {
    /// PC/SC context
    context: Context,
    /// Card connection, if established
    card: Option<Card>,
    /// Reader name
    reader_name: String,
    /// Configuration
    config: PcscConfig,
}

impl fmt::Debug for PcscTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscTransport")
            .field("reader_name", &self.reader_name)
            .field("has_card", &self.card.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl PcscTransport {
    /// Create a new PC/SC transport for the specified reader and connect to its card
    pub(crate) fn new(
        context: Context,
        reader_name: &str,
        config: PcscConfig,
    ) -> Result<Self, PcscError> {
        let mut transport = Self {
            context,
            card: None,
            reader_name: reader_name.to_string(),
            config,
        };

        transport.connect_card()?;

        Ok(transport)
    }

    /// Try to connect to the card
    fn connect_card(&mut self) -> Result<(), PcscError> {
        if self.card.is_some() {
            return Ok(());
        }

        let reader_cstr = CString::new(self.reader_name.clone())
            .map_err(|_| PcscError::ReaderNotFound(self.reader_name.clone()))?;

        match self.context.connect(
            &reader_cstr,
            self.config.share_mode.into(),
            self.config.protocols,
        ) {
            Ok(card) => {
                debug!(reader = %self.reader_name, "Connected to card");
                self.card = Some(card);
                Ok(())
            }
            Err(pcsc::Error::NoSmartcard) => Err(PcscError::NoCard(self.reader_name.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Get the ATR of the current card
    pub fn atr(&self) -> Result<Vec<u8>, PcscError> {
        self.card.as_ref().map_or_else(
            || Err(PcscError::NoCard(self.reader_name.clone())),
            |card| {
                card.get_attribute_owned(pcsc::Attribute::AtrString)
                    .map_err(Into::into)
            },
        )
    }

    /// Get the reader name
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    /// Transmit a command to the card
    fn transmit_command(&mut self, command: &[u8], retried: bool) -> Result<Bytes, PcscError> {
        self.connect_card()?;

        let card = self
            .card
            .as_mut()
            .ok_or_else(|| PcscError::NoCard(self.reader_name.clone()))?;

        let mut response_buffer = [0u8; MAX_BUFFER_SIZE];

        match card.transmit(command, &mut response_buffer) {
            Ok(response) => Ok(Bytes::copy_from_slice(response)),
            Err(e @ (pcsc::Error::ResetCard | pcsc::Error::RemovedCard)) => {
                // The handle is dead either way
                self.card = None;

                if e == pcsc::Error::ResetCard && self.config.auto_reconnect && !retried {
                    warn!(reader = %self.reader_name, "Card was reset, reconnecting");
                    return self.transmit_command(command, true);
                }

                Err(if e == pcsc::Error::ResetCard {
                    PcscError::CardReset
                } else {
                    PcscError::CardRemoved
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl CardTransport for PcscTransport {
    type Error = PcscError;

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Self::Error> {
        self.transmit_command(command, false)
    }

    fn is_connected(&self) -> bool {
        self.card.is_some()
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        if let Some(card) = self.card.take() {
            card.disconnect(Disposition::ResetCard)
                .map_err(|(_, e)| PcscError::from(e))?;
        }

        self.connect_card()
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        match self.card.take() {
            Some(card) => {
                debug!(reader = %self.reader_name, "Disconnecting from card");
                card.disconnect(Disposition::LeaveCard)
                    .map_err(|(_, e)| PcscError::from(e))
            }
            None => Ok(()),
        }
    }
}

impl Drop for PcscTransport {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            let _ = card.disconnect(Disposition::LeaveCard);
        }
    }
}
