use bytes::{BufMut, Bytes, BytesMut};
use satochip_apdu_core::{ApduCommand, ApduResponse, Error as ApduError, Response};

use crate::constants::{CHALLENGE_RESPONSE_LENGTH, CLA_SATOCHIP, ins, sw};

/// SIGN TRANSACTION command
///
/// Signs the hash of the last parsed transaction with the given key slot.
#[derive(Debug, Clone)]
pub struct SignTransactionCommand {
    key_number: u8,
    data: Bytes,
}

impl SignTransactionCommand {
    /// Sign `hash`, attaching the 2FA challenge-response when the card asked for one
    pub fn new(
        key_number: u8,
        hash: &[u8; 32],
        challenge_response: Option<&[u8; CHALLENGE_RESPONSE_LENGTH]>,
    ) -> Self {
        let mut data = BytesMut::with_capacity(32 + CHALLENGE_RESPONSE_LENGTH);
        data.put_slice(hash);
        if let Some(response) = challenge_response {
            data.put_slice(response);
        }
        Self {
            key_number,
            data: data.freeze(),
        }
    }
}

/// SIGN TRANSACTION success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignTransactionOk {
    /// DER encoded signature
    Signature(Bytes),
}

/// SIGN TRANSACTION failures
#[derive(Debug, thiserror::Error)]
pub enum SignTransactionError {
    /// Link or response framing failure
    #[error(transparent)]
    Apdu(#[from] ApduError),

    /// PIN not verified
    #[error("PIN must be verified first")]
    Unauthorized,

    /// The 2FA challenge-response was missing or wrong
    #[error("2FA challenge-response rejected by card")]
    ChallengeResponseRejected,

    /// The hash is not the one from the last PARSE TRANSACTION
    #[error("Transaction hash does not match the parsed transaction")]
    IncorrectHash,

    /// Unmapped status word
    #[error("Unknown status word: {sw1:02X}{sw2:02X}")]
    Unknown {
        /// SW1
        sw1: u8,
        /// SW2
        sw2: u8,
    },
}

impl ApduCommand for SignTransactionCommand {
    type Success = SignTransactionOk;
    type Error = SignTransactionError;

    fn convert_error(error: ApduError) -> Self::Error {
        Self::Error::Apdu(error)
    }

    fn class(&self) -> u8 {
        CLA_SATOCHIP
    }

    fn instruction(&self) -> u8 {
        ins::SIGN_TRANSACTION
    }

    fn p1(&self) -> u8 {
        self.key_number
    }

    fn p2(&self) -> u8 {
        0x00
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        match response.status() {
            sw::SUCCESS => Ok(SignTransactionOk::Signature(Bytes::copy_from_slice(
                response.data(),
            ))),
            sw::UNAUTHORIZED => Err(SignTransactionError::Unauthorized),
            sw::SIGNATURE_INVALID => Err(SignTransactionError::ChallengeResponseRejected),
            sw::INCORRECT_TXHASH => Err(SignTransactionError::IncorrectHash),
            status => Err(SignTransactionError::Unknown {
                sw1: status.sw1,
                sw2: status.sw2,
            }),
        }
    }
}
