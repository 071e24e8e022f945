use bytes::Bytes;
use satochip_apdu_core::{ApduCommand, ApduResponse, Error as ApduError, Response};

use crate::constants::{CLA_SATOCHIP, ins, sw};

/// VERIFY PIN command
#[derive(Debug, Clone)]
pub struct VerifyPinCommand {
    pin_number: u8,
    pin: Bytes,
}

impl VerifyPinCommand {
    /// Verify the user PIN (PIN 0)
    pub fn user(pin: &[u8]) -> Self {
        Self::with_pin_number(0, pin)
    }

    /// Verify a specific PIN slot
    pub fn with_pin_number(pin_number: u8, pin: &[u8]) -> Self {
        Self {
            pin_number,
            pin: Bytes::copy_from_slice(pin),
        }
    }
}

/// VERIFY PIN success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyPinOk {
    /// PIN accepted
    Verified,
}

/// VERIFY PIN failures
#[derive(Debug, thiserror::Error)]
pub enum VerifyPinError {
    /// Link or response framing failure
    #[error(transparent)]
    Apdu(#[from] ApduError),

    /// Wrong PIN
    #[error("Wrong PIN, {remaining} attempts left")]
    WrongPin {
        /// Attempts left before the PIN blocks
        remaining: u8,
    },

    /// PIN is blocked
    #[error("PIN is blocked")]
    Blocked,

    /// SETUP has not been run
    #[error("Card setup not done")]
    SetupNotDone,

    /// Unmapped status word
    #[error("Unknown status word: {sw1:02X}{sw2:02X}")]
    Unknown {
        /// SW1
        sw1: u8,
        /// SW2
        sw2: u8,
    },
}

impl ApduCommand for VerifyPinCommand {
    type Success = VerifyPinOk;
    type Error = VerifyPinError;

    fn convert_error(error: ApduError) -> Self::Error {
        Self::Error::Apdu(error)
    }

    fn class(&self) -> u8 {
        CLA_SATOCHIP
    }

    fn instruction(&self) -> u8 {
        ins::VERIFY_PIN
    }

    fn p1(&self) -> u8 {
        self.pin_number
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.pin)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        let status = response.status();
        match status {
            sw::SUCCESS => Ok(VerifyPinOk::Verified),
            sw::IDENTITY_BLOCKED => Err(VerifyPinError::Blocked),
            sw::SETUP_NOT_DONE => Err(VerifyPinError::SetupNotDone),
            _ => match status.remaining_tries() {
                Some(0) => Err(VerifyPinError::Blocked),
                Some(remaining) => Err(VerifyPinError::WrongPin { remaining }),
                None => Err(VerifyPinError::Unknown {
                    sw1: status.sw1,
                    sw2: status.sw2,
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_pin_encoding() {
        assert_eq!(
            hex::encode(VerifyPinCommand::user(b"1234").to_bytes().unwrap()),
            "b04200000431323334"
        );
    }

    #[test]
    fn test_verify_pin_status_words() {
        let wrong = VerifyPinCommand::parse_response_raw(Bytes::from_static(&[0x63, 0xC2]));
        assert!(matches!(wrong, Err(VerifyPinError::WrongPin { remaining: 2 })));

        let last = VerifyPinCommand::parse_response_raw(Bytes::from_static(&[0x63, 0xC0]));
        assert!(matches!(last, Err(VerifyPinError::Blocked)));

        let blocked = VerifyPinCommand::parse_response_raw(Bytes::from_static(&[0x9C, 0x0C]));
        assert!(matches!(blocked, Err(VerifyPinError::Blocked)));
    }
}
