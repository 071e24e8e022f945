use satochip_apdu_core::{ApduCommand, ApduResponse, Error as ApduError, Response};

use crate::constants::{CLA_SATOCHIP, ins, sw};
use crate::types::DeviceStatus;

/// GET STATUS command
#[derive(Debug, Clone, Copy, Default)]
pub struct GetStatusCommand;

impl GetStatusCommand {
    /// Create a GET STATUS command
    pub const fn new() -> Self {
        Self
    }
}

/// GET STATUS outcomes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetStatusOk {
    /// Card is set up
    Status(DeviceStatus),
    /// SETUP has not been run on this card
    SetupNotDone,
}

/// GET STATUS failures
#[derive(Debug, thiserror::Error)]
pub enum GetStatusError {
    /// Link or response framing failure
    #[error(transparent)]
    Apdu(#[from] ApduError),

    /// Unmapped status word
    #[error("Unknown status word: {sw1:02X}{sw2:02X}")]
    Unknown {
        /// SW1
        sw1: u8,
        /// SW2
        sw2: u8,
    },
}

impl ApduCommand for GetStatusCommand {
    type Success = GetStatusOk;
    type Error = GetStatusError;

    fn convert_error(error: ApduError) -> Self::Error {
        Self::Error::Apdu(error)
    }

    fn class(&self) -> u8 {
        CLA_SATOCHIP
    }

    fn instruction(&self) -> u8 {
        ins::GET_STATUS
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
            sw::SUCCESS => {
                let status = DeviceStatus::try_from(response.data()).map_err(ApduError::from)?;
                Ok(GetStatusOk::Status(status))
            }
            sw::SETUP_NOT_DONE => Ok(GetStatusOk::SetupNotDone),
            status => Err(GetStatusError::Unknown {
                sw1: status.sw1,
                sw2: status.sw2,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_get_status_encoding() {
        assert_eq!(
            GetStatusCommand::new().to_bytes().unwrap().as_ref(),
            &[0xB0, 0x3C, 0x00, 0x00]
        );
    }

    #[test]
    fn test_get_status_uninitialized() {
        let result = GetStatusCommand::parse_response_raw(Bytes::from_static(&[0x9C, 0x04]));
        assert_eq!(result.unwrap(), GetStatusOk::SetupNotDone);
    }

    #[test]
    fn test_get_status_short_payload_is_framing_error() {
        let result =
            GetStatusCommand::parse_response_raw(Bytes::from_static(&[0x00, 0x0C, 0x90, 0x00]));
        assert!(matches!(result, Err(GetStatusError::Apdu(_))));
    }
}
