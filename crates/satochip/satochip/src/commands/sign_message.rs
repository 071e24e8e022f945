use bytes::Bytes;
use satochip_apdu_core::{ApduCommand, ApduResponse, Error as ApduError, Response};

use super::{chunk_data, chunk_phases, init_data};
use crate::constants::{CLA_SATOCHIP, ChunkPhase, ins, sw};

/// One step of a chunked SIGN MESSAGE operation
#[derive(Debug, Clone)]
pub struct SignMessageCommand {
    key_number: u8,
    phase: ChunkPhase,
    data: Bytes,
}

impl SignMessageCommand {
    /// INIT step announcing the message length
    pub fn init(key_number: u8, message_len: usize) -> Self {
        Self {
            key_number,
            phase: ChunkPhase::Init,
            data: init_data(message_len),
        }
    }

    /// PROCESS or FINALIZE step carrying one chunk
    pub fn chunk(key_number: u8, phase: ChunkPhase, chunk: &[u8]) -> Self {
        Self {
            key_number,
            phase,
            data: chunk_data(chunk),
        }
    }

    /// All steps needed to sign `message`, in order
    pub fn sequence(key_number: u8, message: &[u8]) -> Vec<Self> {
        std::iter::once(Self::init(key_number, message.len()))
            .chain(
                chunk_phases(message)
                    .into_iter()
                    .map(|(phase, chunk)| Self::chunk(key_number, phase, chunk)),
            )
            .collect()
    }

    /// Phase of this step
    pub const fn phase(&self) -> ChunkPhase {
        self.phase
    }
}

/// SIGN MESSAGE outcomes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignMessageOk {
    /// Intermediate step accepted
    Accepted,
    /// DER signature returned by FINALIZE
    Signature(Bytes),
}

/// SIGN MESSAGE failures
#[derive(Debug, thiserror::Error)]
pub enum SignMessageError {
    /// Link or response framing failure
    #[error(transparent)]
    Apdu(#[from] ApduError),

    /// PIN not verified
    #[error("PIN must be verified first")]
    Unauthorized,

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

impl ApduCommand for SignMessageCommand {
    type Success = SignMessageOk;
    type Error = SignMessageError;

    fn convert_error(error: ApduError) -> Self::Error {
        Self::Error::Apdu(error)
    }

    fn class(&self) -> u8 {
        CLA_SATOCHIP
    }

    fn instruction(&self) -> u8 {
        ins::SIGN_MESSAGE
    }

    fn p1(&self) -> u8 {
        self.key_number
    }

    fn p2(&self) -> u8 {
        self.phase as u8
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        match response.status() {
            sw::SUCCESS if response.data().is_empty() => Ok(SignMessageOk::Accepted),
            sw::SUCCESS => Ok(SignMessageOk::Signature(Bytes::copy_from_slice(
                response.data(),
            ))),
            sw::UNAUTHORIZED => Err(SignMessageError::Unauthorized),
            sw::SEQUENCE_END | sw::INCORRECT_P2 => Err(SignMessageError::OutOfSequence),
            status => Err(SignMessageError::Unknown {
                sw1: status.sw1,
                sw2: status.sw2,
            }),
        }
    }
}
