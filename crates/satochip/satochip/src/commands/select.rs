use bytes::Bytes;
use satochip_apdu_core::{ApduCommand, ApduResponse, Error as ApduError, Response};

use crate::constants::{CLA_ISO, SATOCHIP_AID, ins, sw};

/// SELECT command for the Satochip applet
#[derive(Debug, Clone)]
pub struct SelectCommand {
    aid: Bytes,
}

impl SelectCommand {
    /// Select an applet by AID
    pub fn with_aid(aid: impl Into<Bytes>) -> Self {
        Self { aid: aid.into() }
    }

    /// Select the Satochip applet
    pub fn satochip() -> Self {
        Self::with_aid(Bytes::from_static(SATOCHIP_AID))
    }
}

/// SELECT success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOk {
    /// Applet is selected
    Selected,
}

/// SELECT failures
#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    /// Link or response framing failure
    #[error(transparent)]
    Apdu(#[from] ApduError),

    /// The applet is not installed on this card
    #[error("Satochip applet not found on card")]
    NotFound,

    /// Unmapped status word
    #[error("Unknown status word: {sw1:02X}{sw2:02X}")]
    Unknown {
        /// SW1
        sw1: u8,
        /// SW2
        sw2: u8,
    },
}

impl ApduCommand for SelectCommand {
    type Success = SelectOk;
    type Error = SelectError;

    fn convert_error(error: ApduError) -> Self::Error {
        Self::Error::Apdu(error)
    }

    fn class(&self) -> u8 {
        CLA_ISO
    }

    fn instruction(&self) -> u8 {
        ins::SELECT
    }

    fn p1(&self) -> u8 {
        0x04
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.aid)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        match response.status() {
            sw::SUCCESS => Ok(SelectOk::Selected),
            sw::FILE_NOT_FOUND => Err(SelectError::NotFound),
            status => Err(SelectError::Unknown {
                sw1: status.sw1,
                sw2: status.sw2,
            }),
        }
    }
}
