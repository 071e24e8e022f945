//! Hash helpers shared by the parser, signer and seed code

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// SHA-256
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Double SHA-256, the Bitcoin transaction digest
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

/// RIPEMD-160 of SHA-256, used for key fingerprints
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}
