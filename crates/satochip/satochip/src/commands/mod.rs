//! Satochip applet command set
//!
//! Every command is an [`ApduCommand`](satochip_apdu_core::ApduCommand) with
//! its own success and error types, so status words are interpreted exactly
//! once, here.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::{CHUNK_SIZE, ChunkPhase};

pub mod crypt_2fa;
pub use crypt_2fa::*;
pub mod get_authentikey;
pub use get_authentikey::*;
pub mod get_extended_key;
pub use get_extended_key::*;
pub mod get_status;
pub use get_status::*;
pub mod import_seed;
pub use import_seed::*;
pub mod parse_transaction;
pub use parse_transaction::*;
pub mod select;
pub use select::*;
pub mod setup;
pub use setup::*;
pub mod sign_message;
pub use sign_message::*;
pub mod sign_transaction;
pub use sign_transaction::*;
pub mod verify_pin;
pub use verify_pin::*;

/// Data field of a PROCESS or FINALIZE chunk: `[u16 length][chunk]`
pub(crate) fn chunk_data(chunk: &[u8]) -> Bytes {
    let mut data = BytesMut::with_capacity(2 + chunk.len());
    data.put_u16(chunk.len() as u16);
    data.put_slice(chunk);
    data.freeze()
}

/// Data field of an INIT phase announcing the total length: `[u32 length]`
pub(crate) fn init_data(total_len: usize) -> Bytes {
    Bytes::copy_from_slice(&(total_len as u32).to_be_bytes())
}

/// Split a buffer into PROCESS chunks closed by a FINALIZE chunk
///
/// An empty buffer still yields one empty FINALIZE chunk so the card sees the
/// end of the operation.
pub(crate) fn chunk_phases(data: &[u8]) -> Vec<(ChunkPhase, &[u8])> {
    let mut chunks: Vec<_> = data
        .chunks(CHUNK_SIZE)
        .map(|chunk| (ChunkPhase::Process, chunk))
        .collect();
    match chunks.last_mut() {
        Some(last) => last.0 = ChunkPhase::Finalize,
        None => chunks.push((ChunkPhase::Finalize, &[][..])),
    }
    chunks
}

/// Adds `is_transport` to command error enums that wrap the core APDU error
macro_rules! impl_is_transport {
    ($($error:ty),* $(,)?) => {
        $(
            impl $error {
                /// Whether the failure happened below the applet, on the link
                pub fn is_transport(&self) -> bool {
                    matches!(self, Self::Apdu(e) if e.is_transport())
                }
            }
        )*
    };
}

impl_is_transport!(
    Crypt2faError,
    GetAuthentikeyError,
    GetExtendedKeyError,
    GetStatusError,
    ImportSeedError,
    ParseTransactionError,
    SelectError,
    SetupError,
    SignMessageError,
    SignTransactionError,
    VerifyPinError,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_framing() {
        assert_eq!(chunk_data(&[0xAA, 0xBB]).as_ref(), &[0x00, 0x02, 0xAA, 0xBB]);
        assert_eq!(init_data(300).as_ref(), &[0x00, 0x00, 0x01, 0x2C]);
    }

    #[test]
    fn test_chunk_phases() {
        let data = [0u8; 300];
        let phases: Vec<_> = chunk_phases(&data)
            .into_iter()
            .map(|(phase, chunk)| (phase, chunk.len()))
            .collect();
        assert_eq!(
            phases,
            vec![
                (ChunkPhase::Process, 128),
                (ChunkPhase::Process, 128),
                (ChunkPhase::Finalize, 44)
            ]
        );

        assert_eq!(chunk_phases(&[]), vec![(ChunkPhase::Finalize, &[][..])]);
    }
}
