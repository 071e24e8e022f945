use bytes::Bytes;
use satochip_apdu_core::{ApduCommand, ApduResponse, CommandError, Error as ApduError, Response};
use zeroize::Zeroizing;

use crate::constants::{CLA_SATOCHIP, ins, sw};

/// Smallest BIP32 seed the card accepts
pub const MIN_SEED_LENGTH: usize = 16;
/// Largest BIP32 seed the card accepts
pub const MAX_SEED_LENGTH: usize = 64;

/// BIP32 IMPORT SEED command
#[derive(Debug, Clone)]
pub struct ImportSeedCommand {
    seed: Zeroizing<Vec<u8>>,
}

impl ImportSeedCommand {
    /// Import a 16 to 64 byte BIP32 seed
    pub fn new(seed: &[u8]) -> Result<Self, CommandError> {
        if !(MIN_SEED_LENGTH..=MAX_SEED_LENGTH).contains(&seed.len()) {
            return Err(CommandError::InvalidLength(seed.len()));
        }
        Ok(Self {
            seed: Zeroizing::new(seed.to_vec()),
        })
    }
}

/// IMPORT SEED success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSeedOk {
    /// Seed stored; the payload carries the authentikey coordinate and its self-signature
    Imported {
        /// Raw response payload
        payload: Bytes,
    },
}

/// IMPORT SEED failures
#[derive(Debug, thiserror::Error)]
pub enum ImportSeedError {
    /// Link or response framing failure
    #[error(transparent)]
    Apdu(#[from] ApduError),

    /// A seed is already present
    #[error("Card already holds a seed")]
    AlreadySeeded,

    /// PIN not verified
    #[error("PIN must be verified first")]
    Unauthorized,

    /// Unmapped status word
    #[error("Unknown status word: {sw1:02X}{sw2:02X}")]
    Unknown {
        /// SW1
        sw1: u8,
        /// SW2
        sw2: u8,
    },
}

impl ApduCommand for ImportSeedCommand {
    type Success = ImportSeedOk;
    type Error = ImportSeedError;

    fn convert_error(error: ApduError) -> Self::Error {
        Self::Error::Apdu(error)
    }

    fn class(&self) -> u8 {
        CLA_SATOCHIP
    }

    fn instruction(&self) -> u8 {
        ins::BIP32_IMPORT_SEED
    }

    fn p1(&self) -> u8 {
        // Bounded by MAX_SEED_LENGTH in the constructor
        self.seed.len() as u8
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.seed)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        match response.status() {
            sw::SUCCESS => Ok(ImportSeedOk::Imported {
                payload: Bytes::copy_from_slice(response.data()),
            }),
            sw::BIP32_INITIALIZED_SEED => Err(ImportSeedError::AlreadySeeded),
            sw::UNAUTHORIZED => Err(ImportSeedError::Unauthorized),
            status => Err(ImportSeedError::Unknown {
                sw1: status.sw1,
                sw2: status.sw2,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_seed_p1_is_length() {
        let command = ImportSeedCommand::new(&[0x42; 32]).unwrap();
        let bytes = command.to_bytes().unwrap();
        assert_eq!(&bytes[..5], &[0xB0, 0x6C, 32, 0x00, 32]);
    }

    #[test]
    fn test_import_seed_length_bounds() {
        assert!(ImportSeedCommand::new(&[0; 15]).is_err());
        assert!(ImportSeedCommand::new(&[0; 16]).is_ok());
        assert!(ImportSeedCommand::new(&[0; 64]).is_ok());
        assert!(ImportSeedCommand::new(&[0; 65]).is_err());
    }

    #[test]
    fn test_import_seed_already_seeded() {
        let result = ImportSeedCommand::parse_response_raw(Bytes::from_static(&[0x9C, 0x17]));
        assert!(matches!(result, Err(ImportSeedError::AlreadySeeded)));
    }
}
