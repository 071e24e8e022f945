use bytes::Bytes;
use satochip_apdu_core::{ApduCommand, ApduResponse, Error as ApduError, Response};

use super::{chunk_data, chunk_phases};
use crate::constants::{CLA_SATOCHIP, ChunkPhase, ins, sw};

/// Direction of a 2FA crypt operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CryptMode {
    /// Decrypt a reply from the second device
    Decrypt = 0x01,
    /// Encrypt a request for the second device
    Encrypt = 0x02,
}

/// One step of a chunked CRYPT TRANSACTION 2FA operation
///
/// The card encrypts with AES-CBC under a key derived from the 2FA secret and
/// does no padding; callers pad to the block size.
#[derive(Debug, Clone)]
pub struct Crypt2faCommand {
    phase: ChunkPhase,
    mode: CryptMode,
    data: Option<Bytes>,
}

impl Crypt2faCommand {
    /// Start an encryption; the card answers with `IV(16) id(20)`
    pub const fn init_encrypt() -> Self {
        Self {
            phase: ChunkPhase::Init,
            mode: CryptMode::Encrypt,
            data: None,
        }
    }

    /// Start a decryption with the IV that prefixed the ciphertext
    pub fn init_decrypt(iv: &[u8; 16]) -> Self {
        Self {
            phase: ChunkPhase::Init,
            mode: CryptMode::Decrypt,
            data: Some(Bytes::copy_from_slice(iv)),
        }
    }

    /// PROCESS or FINALIZE step carrying one chunk
    pub fn chunk(mode: CryptMode, phase: ChunkPhase, chunk: &[u8]) -> Self {
        Self {
            phase,
            mode,
            data: Some(chunk_data(chunk)),
        }
    }

    /// PROCESS and FINALIZE steps for a block-aligned buffer
    pub fn chunks(mode: CryptMode, data: &[u8]) -> Vec<Self> {
        chunk_phases(data)
            .into_iter()
            .map(|(phase, chunk)| Self::chunk(mode, phase, chunk))
            .collect()
    }

    /// Phase of this step
    pub const fn phase(&self) -> ChunkPhase {
        self.phase
    }
}

/// CRYPT TRANSACTION 2FA success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Crypt2faOk {
    /// INIT: `IV(16) id(20)` when encrypting, empty when decrypting;
    /// PROCESS/FINALIZE: `[u16]output`
    Success {
        /// Raw response payload
        payload: Bytes,
    },
}

/// CRYPT TRANSACTION 2FA failures
#[derive(Debug, thiserror::Error)]
pub enum Crypt2faError {
    /// Link or response framing failure
    #[error(transparent)]
    Apdu(#[from] ApduError),

    /// 2FA was never enabled on this card
    #[error("2FA is not initialized on this card")]
    TwoFactorUninitialized,

    /// Steps were sent out of order
    #[error("Chunked operation out of sequence")]
    OutOfSequence,

    /// Unmapped status word
    #[error("Unknown status word: {sw1:02X}{sw2:02X}")]
    Unknown {
        /// SW1
        sw1: u8,
        /// SW2
        sw2: u8,
    },
}

impl ApduCommand for Crypt2faCommand {
    type Success = Crypt2faOk;
    type Error = Crypt2faError;

    fn convert_error(error: ApduError) -> Self::Error {
        Self::Error::Apdu(error)
    }

    fn class(&self) -> u8 {
        CLA_SATOCHIP
    }

    fn instruction(&self) -> u8 {
        ins::CRYPT_TRANSACTION_2FA
    }

    fn p1(&self) -> u8 {
        self.phase as u8
    }

    fn p2(&self) -> u8 {
        self.mode as u8
    }

    fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        match response.status() {
            sw::SUCCESS => Ok(Crypt2faOk::Success {
                payload: Bytes::copy_from_slice(response.data()),
            }),
            sw::TWO_FA_UNINITIALIZED_KEY => Err(Crypt2faError::TwoFactorUninitialized),
            sw::SEQUENCE_END | sw::INCORRECT_P1 => Err(Crypt2faError::OutOfSequence),
            status => Err(Crypt2faError::Unknown {
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
    fn test_crypt_2fa_init() {
        assert_eq!(
            Crypt2faCommand::init_encrypt().to_bytes().unwrap().as_ref(),
            &[0xB0, 0x76, 0x01, 0x02]
        );

        let decrypt = Crypt2faCommand::init_decrypt(&[0x33; 16]);
        assert_eq!(&decrypt.to_bytes().unwrap()[..5], &[0xB0, 0x76, 0x01, 0x01, 16]);
    }

    #[test]
    fn test_crypt_2fa_chunks() {
        let steps = Crypt2faCommand::chunks(CryptMode::Encrypt, &[0u8; 144]);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].phase(), ChunkPhase::Process);
        assert_eq!(steps[1].phase(), ChunkPhase::Finalize);
        assert_eq!(&steps[1].data().unwrap()[..2], &[0x00, 0x10]);
    }

    #[test]
    fn test_crypt_2fa_uninitialized() {
        let result = Crypt2faCommand::parse_response_raw(Bytes::from_static(&[0x9C, 0x19]));
        assert!(matches!(result, Err(Crypt2faError::TwoFactorUninitialized)));
    }
}
