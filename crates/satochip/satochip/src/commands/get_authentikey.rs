use bytes::Bytes;
use satochip_apdu_core::{ApduCommand, ApduResponse, Error as ApduError, Response};

use crate::constants::{CLA_SATOCHIP, ins, sw};

/// BIP32 GET AUTHENTIKEY command
#[derive(Debug, Clone, Copy, Default)]
pub struct GetAuthentikeyCommand;

impl GetAuthentikeyCommand {
    /// Create a GET AUTHENTIKEY command
    pub const fn new() -> Self {
        Self
    }
}

/// GET AUTHENTIKEY success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetAuthentikeyOk {
    /// `[u16]coordx [u16]self_sig`
    Success {
        /// Raw response payload
        payload: Bytes,
    },
}

/// GET AUTHENTIKEY failures
#[derive(Debug, thiserror::Error)]
pub enum GetAuthentikeyError {
    /// Link or response framing failure
    #[error(transparent)]
    Apdu(#[from] ApduError),

    /// No seed has been imported
    #[error("Card seed is not initialized")]
    UninitializedSeed,

    /// Unmapped status word
    #[error("Unknown status word: {sw1:02X}{sw2:02X}")]
    Unknown {
        /// SW1
        sw1: u8,
        /// SW2
        sw2: u8,
    },
}

impl ApduCommand for GetAuthentikeyCommand {
    type Success = GetAuthentikeyOk;
    type Error = GetAuthentikeyError;

    fn convert_error(error: ApduError) -> Self::Error {
        Self::Error::Apdu(error)
    }

    fn class(&self) -> u8 {
        CLA_SATOCHIP
    }

    fn instruction(&self) -> u8 {
        ins::BIP32_GET_AUTHENTIKEY
    }

    fn p1(&self) -> u8 {
        0x00
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        None
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        match response.status() {
            sw::SUCCESS => Ok(GetAuthentikeyOk::Success {
                payload: Bytes::copy_from_slice(response.data()),
            }),
            sw::BIP32_UNINITIALIZED_SEED => Err(GetAuthentikeyError::UninitializedSeed),
            status => Err(GetAuthentikeyError::Unknown {
                sw1: status.sw1,
                sw2: status.sw2,
            }),
        }
    }
}
