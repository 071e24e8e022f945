use bytes::Bytes;
use satochip_apdu_core::{ApduCommand, ApduResponse, Error as ApduError, Response};

use super::{chunk_data, chunk_phases, init_data};
use crate::constants::{CLA_SATOCHIP, ChunkPhase, ins, sw};

/// One step of a chunked PARSE TRANSACTION operation
///
/// The card hashes the preimage itself and remembers the result; the next
/// SIGN TRANSACTION must present the same hash.
#[derive(Debug, Clone)]
pub struct ParseTransactionCommand {
    phase: ChunkPhase,
    segwit: bool,
    data: Bytes,
}

impl ParseTransactionCommand {
    /// INIT step announcing the preimage length
    pub fn init(preimage_len: usize, segwit: bool) -> Self {
        Self {
            phase: ChunkPhase::Init,
            segwit,
            data: init_data(preimage_len),
        }
    }

    /// PROCESS or FINALIZE step carrying one chunk
    pub fn chunk(phase: ChunkPhase, chunk: &[u8], segwit: bool) -> Self {
        Self {
            phase,
            segwit,
            data: chunk_data(chunk),
        }
    }

    /// All steps needed to parse `preimage`, in order
    pub fn sequence(preimage: &[u8], segwit: bool) -> Vec<Self> {
        std::iter::once(Self::init(preimage.len(), segwit))
            .chain(
                chunk_phases(preimage)
                    .into_iter()
                    .map(|(phase, chunk)| Self::chunk(phase, chunk, segwit)),
            )
            .collect()
    }

    /// Phase of this step
    pub const fn phase(&self) -> ChunkPhase {
        self.phase
    }
}

/// PARSE TRANSACTION outcomes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseTransactionOk {
    /// Intermediate step accepted
    Accepted,
    /// FINALIZE result: `[u16]data(hash(32) needs2fa(1)) [u16]auth_sig`
    Parsed(Bytes),
}

/// PARSE TRANSACTION failures
#[derive(Debug, thiserror::Error)]
pub enum ParseTransactionError {
    /// Link or response framing failure
    #[error(transparent)]
    Apdu(#[from] ApduError),

    /// PIN not verified
    #[error("PIN must be verified first")]
    Unauthorized,

    /// The card could not parse the preimage
    #[error("Card rejected the transaction preimage")]
    InvalidPreimage,

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

impl ApduCommand for ParseTransactionCommand {
    type Success = ParseTransactionOk;
    type Error = ParseTransactionError;

    fn convert_error(error: ApduError) -> Self::Error {
        Self::Error::Apdu(error)
    }

    fn class(&self) -> u8 {
        CLA_SATOCHIP
    }

    fn instruction(&self) -> u8 {
        ins::PARSE_TRANSACTION
    }

    fn p1(&self) -> u8 {
        self.phase as u8
    }

    fn p2(&self) -> u8 {
        u8::from(self.segwit)
    }

    fn data(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn parse_response(response: Response) -> Result<Self::Success, Self::Error> {
        match response.status() {
            sw::SUCCESS if response.data().is_empty() => Ok(ParseTransactionOk::Accepted),
            sw::SUCCESS => Ok(ParseTransactionOk::Parsed(Bytes::copy_from_slice(
                response.data(),
            ))),
            sw::UNAUTHORIZED => Err(ParseTransactionError::Unauthorized),
            sw::INVALID_PARAMETER => Err(ParseTransactionError::InvalidPreimage),
            sw::SEQUENCE_END | sw::INCORRECT_P1 => Err(ParseTransactionError::OutOfSequence),
            status => Err(ParseTransactionError::Unknown {
                sw1: status.sw1,
                sw2: status.sw2,
            }),
        }
    }
}
