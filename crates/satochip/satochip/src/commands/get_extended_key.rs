use bytes::Bytes;
use satochip_apdu_core::{ApduCommand, ApduResponse, Error as ApduError, Response};

use crate::constants::{CLA_SATOCHIP, ins, sw};
use crate::path::{KeyPath, PathError};

/// P2 option bits
const OPTION_SIGN_WITH_AUTHENTIKEY: u8 = 0x40;
const OPTION_FLUSH_CACHE: u8 = 0x80;

/// BIP32 GET EXTENDED KEY command
#[derive(Debug, Clone)]
pub struct GetExtendedKeyCommand {
    depth: u8,
    path: Bytes,
    flush_cache: bool,
}

impl GetExtendedKeyCommand {
    /// Derive the key at `path`
    pub fn new(path: &KeyPath) -> Result<Self, PathError> {
        let (depth, path) = path.encode()?;
        Ok(Self {
            depth,
            path,
            flush_cache: false,
        })
    }

    /// Ask the card to flush its derivation cache first
    pub fn with_flush(mut self) -> Self {
        self.flush_cache = true;
        self
    }
}

/// GET EXTENDED KEY success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetExtendedKeyOk {
    /// `chaincode(32) [u16]coordx [u16]self_sig [u16]auth_sig`
    Success {
        /// Raw response payload
        payload: Bytes,
    },
}

/// GET EXTENDED KEY failures
#[derive(Debug, thiserror::Error)]
pub enum GetExtendedKeyError {
    /// Link or response framing failure
    #[error(transparent)]
    Apdu(#[from] ApduError),

    /// The derivation cache is full; retry with a flush
    #[error("Card key cache is full")]
    CacheFull,

    /// PIN not verified
    #[error("PIN must be verified first")]
    Unauthorized,

    /// No seed has been imported
    #[error("Card seed is not initialized")]
    UninitializedSeed,

    /// The card could not derive the key
    #[error("BIP32 derivation failed on card")]
    DerivationFailed,

    /// Unmapped status word
    #[error("Unknown status word: {sw1:02X}{sw2:02X}")]
    Unknown {
        /// SW1
        sw1: u8,
        /// SW2
        sw2: u8,
    },
}

impl ApduCommand for GetExtendedKeyCommand {
    type Success = GetExtendedKeyOk;
    type Error = GetExtendedKeyError;

    fn convert_error(error: ApduError) -> Self::Error {
        Self::Error::Apdu(error)
    }

    fn class(&self) -> u8 {
        CLA_SATOCHIP
    }

    fn instruction(&self) -> u8 {
        ins::BIP32_GET_EXTENDED_KEY
    }

    fn p1(&self) -> u8 {
        self.depth
    }

    fn p2(&self) -> u8 {
        if self.flush_cache {
            OPTION_SIGN_WITH_AUTHENTIKEY | OPTION_FLUSH_CACHE
        } else {
            OPTION_SIGN_WITH_AUTHENTIKEY
        }
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.path)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        match response.status() {
            sw::SUCCESS => Ok(GetExtendedKeyOk::Success {
                payload: Bytes::copy_from_slice(response.data()),
            }),
            sw::NO_MEMORY_LEFT => Err(GetExtendedKeyError::CacheFull),
            sw::UNAUTHORIZED => Err(GetExtendedKeyError::Unauthorized),
            sw::BIP32_UNINITIALIZED_SEED => Err(GetExtendedKeyError::UninitializedSeed),
            sw::BIP32_DERIVATION_ERROR => Err(GetExtendedKeyError::DerivationFailed),
            status => Err(GetExtendedKeyError::Unknown {
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
    fn test_get_extended_key_encoding() {
        let path: KeyPath = "m/44'/2'/0'".parse().unwrap();
        let command = GetExtendedKeyCommand::new(&path).unwrap();
        assert_eq!(
            hex::encode(command.to_bytes().unwrap()),
            "b06d03400c8000002c8000000280000000"
        );

        let flushed = command.with_flush();
        assert_eq!(flushed.p2(), 0xC0);
    }

    #[test]
    fn test_get_extended_key_master() {
        let command = GetExtendedKeyCommand::new(&KeyPath::master()).unwrap();
        assert_eq!(command.p1(), 0);
        assert_eq!(command.data(), Some(&[][..]));
    }

    #[test]
    fn test_get_extended_key_rejects_deep_path() {
        let path = KeyPath::from_indices(vec![1; 64]);
        assert!(matches!(
            GetExtendedKeyCommand::new(&path),
            Err(PathError::TooDeep(64))
        ));
    }

    #[test]
    fn test_get_extended_key_cache_full() {
        let result = GetExtendedKeyCommand::parse_response_raw(Bytes::from_static(&[0x9C, 0x01]));
        assert!(matches!(result, Err(GetExtendedKeyError::CacheFull)));
    }
}
