//! Decoding and verification of card responses
//!
//! The card returns public keys as bare x-coordinates followed by a
//! self-signature; the point is recovered by trying both parities. Responses
//! that carry key material or transaction hashes are also signed by the card
//! authentikey. Every signature covers all bytes that precede its own length
//! prefix.

use k256::ecdsa::signature::Verifier;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use satochip_apdu_core::{ResponseError, utils::PayloadReader};
use tracing::debug;

use crate::error::{IntegrityError, Result};

/// Length of an x-coordinate
const COORD_LENGTH: usize = 32;

/// Outcome of PARSE TRANSACTION
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTransaction {
    /// Double SHA-256 of the preimage as computed by the card
    pub hash: [u8; 32],
    /// Whether SIGN TRANSACTION will require a challenge-response
    pub needs_2fa: bool,
}

/// Decode a DER signature and bring it to low-S form
pub fn normalize_signature(der: &[u8]) -> std::result::Result<Signature, IntegrityError> {
    let signature = Signature::from_der(der).map_err(|_| IntegrityError::Signature)?;
    Ok(signature.normalize_s().unwrap_or(signature))
}

/// Recover a public key from its x-coordinate and the card self-signature over `message`
pub fn recover_public_key(
    coordx: &[u8],
    self_signature: &[u8],
    message: &[u8],
) -> Result<VerifyingKey> {
    if coordx.len() != COORD_LENGTH {
        return Err(ResponseError::parse("public key coordinate must be 32 bytes").into());
    }
    let signature = normalize_signature(self_signature)?;

    let mut sec1 = [0u8; 1 + COORD_LENGTH];
    sec1[1..].copy_from_slice(coordx);
    for parity in [0x02, 0x03] {
        sec1[0] = parity;
        let Ok(key) = VerifyingKey::from_sec1_bytes(&sec1) else {
            continue;
        };
        if key.verify(message, &signature).is_ok() {
            return Ok(key);
        }
    }

    Err(IntegrityError::SelfSignature.into())
}

fn verify_authentikey_signature(
    authentikey: Option<&VerifyingKey>,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let Some(authentikey) = authentikey else {
        debug!("No authentikey cached, skipping response signature check");
        return Ok(());
    };
    let signature =
        normalize_signature(signature).map_err(|_| IntegrityError::AuthentikeySignature)?;
    authentikey
        .verify(message, &signature)
        .map_err(|_| IntegrityError::AuthentikeySignature)?;
    Ok(())
}

/// Decode `[u16]coordx [u16]self_sig` into the authentikey
///
/// GET AUTHENTIKEY and IMPORT SEED share this layout.
pub fn parse_authentikey(payload: &[u8]) -> Result<VerifyingKey> {
    let mut reader = PayloadReader::new(payload);
    let coordx = reader.read_prefixed()?;
    let signed = reader.consumed();
    let self_signature = reader.read_prefixed()?;
    recover_public_key(coordx, self_signature, signed)
}

/// Decode `chaincode(32) [u16]coordx [u16]self_sig [u16]auth_sig`
pub fn parse_extended_key(
    payload: &[u8],
    authentikey: Option<&VerifyingKey>,
) -> Result<(VerifyingKey, [u8; 32])> {
    let mut reader = PayloadReader::new(payload);
    let chain_code = reader.read_array::<32>()?;
    let coordx = reader.read_prefixed()?;
    let self_signed = reader.consumed();
    let self_signature = reader.read_prefixed()?;
    let auth_signed = reader.consumed();
    let auth_signature = reader.read_prefixed()?;

    let key = recover_public_key(coordx, self_signature, self_signed)?;
    verify_authentikey_signature(authentikey, auth_signed, auth_signature)?;
    Ok((key, chain_code))
}

/// Decode the PARSE TRANSACTION result `[u16]data(hash(32) needs2fa(1)) [u16]auth_sig`
pub fn parse_transaction_response(
    payload: &[u8],
    authentikey: Option<&VerifyingKey>,
) -> Result<ParsedTransaction> {
    let mut reader = PayloadReader::new(payload);
    let data = reader.read_prefixed()?;
    let signed = reader.consumed();
    let auth_signature = reader.read_prefixed()?;
    verify_authentikey_signature(authentikey, signed, auth_signature)?;

    let mut data = PayloadReader::new(data);
    let hash = data.read_array::<32>()?;
    let needs_2fa = data.read_u8().is_ok_and(|flag| flag != 0);
    Ok(ParsedTransaction { hash, needs_2fa })
}

/// Decode a SIGN TRANSACTION signature, normalize it and verify it over `hash`
pub fn parse_transaction_signature(
    der: &[u8],
    public_key: &VerifyingKey,
    hash: &[u8; 32],
) -> Result<Signature> {
    let signature = normalize_signature(der)?;
    public_key
        .verify_prehash(hash, &signature)
        .map_err(|_| IntegrityError::Signature)?;
    Ok(signature)
}

/// Decode a SIGN MESSAGE signature into a 65-byte compact recoverable signature
///
/// The header byte is `27 + 4 + recid` (compressed key).
pub fn parse_message_signature(
    der: &[u8],
    public_key: &VerifyingKey,
    message: &[u8],
) -> Result<[u8; 65]> {
    let signature = normalize_signature(der)?;
    public_key
        .verify(message, &signature)
        .map_err(|_| IntegrityError::Signature)?;
    let recovery_id = RecoveryId::trial_recovery_from_msg(public_key, message, &signature)
        .map_err(|_| IntegrityError::Signature)?;

    let mut compact = [0u8; 65];
    compact[0] = 27 + 4 + recovery_id.to_byte();
    compact[1..].copy_from_slice(&signature.to_bytes());
    Ok(compact)
}
