//! Transaction and message signing against a simulated card

mod common;

use std::sync::Arc;

use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use parking_lot::Mutex;
use satochip::crypto::{sha256, sha256d};
use satochip::transaction::SighashCache;
use satochip::{
    Error, ErrorKind, InputType, IntegrityError, Keystore, KeystoreConfig, SessionState,
};

use common::{
    SimulatedCard, VECTOR1_SEED, address_path, open_session, p2pkh_spend, public_key_at,
    spend_input,
};

fn keystore(card: &SimulatedCard) -> Keystore<SimulatedCard> {
    Keystore::new(
        Arc::new(Mutex::new(open_session(card))),
        KeystoreConfig::default(),
    )
}

#[test]
fn test_high_s_signature_is_normalized_and_tagged() {
    let card = SimulatedCard::seeded(&VECTOR1_SEED);
    card.state().high_s = true;
    let keystore = keystore(&card);

    let public_key = public_key_at(&VECTOR1_SEED, &address_path(0, 0));
    let mut tx = p2pkh_spend(public_key, (0, 0));
    let unsigned = tx.clone();

    assert_eq!(keystore.sign_transaction(&mut tx).unwrap(), 1);
    assert!(tx.is_complete());

    let signature = tx.inputs[0].signatures[0].clone().unwrap();
    assert_eq!(*signature.last().unwrap(), 0x01);

    let signature = Signature::from_der(&signature[..signature.len() - 1]).unwrap();
    assert!(signature.normalize_s().is_none(), "signature must be low-S");

    let preimage = SighashCache::new(&unsigned).preimage(&unsigned, 0);
    let key = VerifyingKey::from_sec1_bytes(&public_key).unwrap();
    key.verify_prehash(&sha256d(&preimage), &signature).unwrap();
}

#[test]
fn test_tampered_hash_is_integrity_error() {
    let card = SimulatedCard::seeded(&VECTOR1_SEED);
    card.state().tamper_tx_hash = true;
    let keystore = keystore(&card);

    let public_key = public_key_at(&VECTOR1_SEED, &address_path(0, 0));
    let mut tx = p2pkh_spend(public_key, (0, 0));
    let error = keystore.sign_transaction(&mut tx).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Integrity);
    assert!(matches!(
        error,
        Error::Integrity(IntegrityError::HashMismatch { .. })
    ));
    assert!(tx.inputs[0].signatures[0].is_none());
    assert!(!card.state().received(0x6F), "SIGN TRANSACTION must not be sent");
}

#[test]
fn test_wrong_candidate_key_is_rejected() {
    let card = SimulatedCard::seeded(&VECTOR1_SEED);
    let keystore = keystore(&card);

    let other = public_key_at(&VECTOR1_SEED, &address_path(0, 1));
    let mut tx = p2pkh_spend(other, (0, 0));
    let error = keystore.sign_transaction(&mut tx).unwrap_err();
    assert!(matches!(
        error,
        Error::Integrity(IntegrityError::KeyMismatch { .. })
    ));
}

#[test]
fn test_failure_attaches_nothing() {
    let card = SimulatedCard::seeded(&VECTOR1_SEED);
    let keystore = keystore(&card);

    let good = public_key_at(&VECTOR1_SEED, &address_path(0, 0));
    let wrong = public_key_at(&VECTOR1_SEED, &address_path(1, 5));
    let mut tx = p2pkh_spend(good, (0, 0));
    tx.inputs
        .push(spend_input(wrong, (1, 4), InputType::P2pkh, 1));

    assert!(keystore.sign_transaction(&mut tx).is_err());
    assert!(tx.inputs.iter().all(|input| input.signatures[0].is_none()));
    // The first input was signed on the card before the second failed
    assert!(card.state().received(0x6F));
}

#[test]
fn test_mixed_inputs_sign_with_their_own_digest() {
    let card = SimulatedCard::seeded(&VECTOR1_SEED);
    let keystore = keystore(&card);

    let legacy = public_key_at(&VECTOR1_SEED, &address_path(0, 0));
    let segwit = public_key_at(&VECTOR1_SEED, &address_path(0, 1));
    let mut tx = p2pkh_spend(legacy, (0, 0));
    tx.inputs
        .push(spend_input(segwit, (0, 1), InputType::P2wpkh, 1));
    let unsigned = tx.clone();

    assert_eq!(keystore.sign_transaction(&mut tx).unwrap(), 2);

    let cache = SighashCache::new(&unsigned);
    for (index, key) in [legacy, segwit].into_iter().enumerate() {
        let der = tx.inputs[index].signatures[0].clone().unwrap();
        let signature = Signature::from_der(&der[..der.len() - 1]).unwrap();
        let hash = sha256d(&cache.preimage(&unsigned, index));
        VerifyingKey::from_sec1_bytes(&key)
            .unwrap()
            .verify_prehash(&hash, &signature)
            .unwrap();
    }
}

#[test]
fn test_signed_inputs_are_skipped() {
    let card = SimulatedCard::seeded(&VECTOR1_SEED);
    let keystore = keystore(&card);

    let public_key = public_key_at(&VECTOR1_SEED, &address_path(0, 0));
    let mut tx = p2pkh_spend(public_key, (0, 0));
    tx.add_signature(0, 0, vec![0x30, 0x01]);

    assert_eq!(keystore.sign_transaction(&mut tx).unwrap(), 0);
    assert!(!card.state().received(0x71));
}

#[test]
fn test_coinbase_input_is_refused() {
    let card = SimulatedCard::seeded(&VECTOR1_SEED);
    let keystore = keystore(&card);

    let public_key = public_key_at(&VECTOR1_SEED, &address_path(0, 0));
    let mut tx = p2pkh_spend(public_key, (0, 0));
    tx.inputs[0].input_type = InputType::Coinbase;

    let error = keystore.sign_transaction(&mut tx).unwrap_err();
    assert!(matches!(error, Error::CoinbaseInput(0)));
    assert_eq!(error.kind(), ErrorKind::Usage);
}

#[test]
fn test_message_signature_recovers_address_key() {
    let card = SimulatedCard::seeded(&VECTOR1_SEED);
    card.state().high_s = true;
    let keystore = keystore(&card);

    let message = b"Satochip test message";
    let compact = keystore.sign_message((0, 3), message).unwrap();
    assert!((31..=34).contains(&compact[0]));

    let signature = Signature::from_slice(&compact[1..]).unwrap();
    assert!(signature.normalize_s().is_none());
    let recovery_id = RecoveryId::from_byte(compact[0] - 31).unwrap();
    let recovered =
        VerifyingKey::recover_from_prehash(&sha256(message), &signature, recovery_id).unwrap();

    let expected = public_key_at(&VECTOR1_SEED, &address_path(0, 3));
    assert_eq!(recovered.to_encoded_point(true).as_bytes(), &expected);
}

#[test]
fn test_transport_loss_invalidates_session() {
    let card = SimulatedCard::seeded(&VECTOR1_SEED);
    let keystore = keystore(&card);

    let public_key = public_key_at(&VECTOR1_SEED, &address_path(0, 0));
    let mut tx = p2pkh_spend(public_key, (0, 0));
    card.state().removed = true;

    let error = keystore.sign_transaction(&mut tx).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert_eq!(keystore.session().lock().state(), SessionState::Invalid);
    assert!(tx.inputs[0].signatures[0].is_none());
}

#[test]
fn test_signing_after_ping() {
    let card = SimulatedCard::seeded(&VECTOR1_SEED);
    let keystore = keystore(&card);
    let public_key = public_key_at(&VECTOR1_SEED, &address_path(0, 0));

    let mut first = p2pkh_spend(public_key, (0, 0));
    assert_eq!(keystore.sign_transaction(&mut first).unwrap(), 1);

    keystore.session().lock().ping().unwrap();
    assert!(!keystore.session().lock().is_pin_verified());

    let mut second = p2pkh_spend(public_key, (0, 0));
    assert_eq!(keystore.sign_transaction(&mut second).unwrap(), 1);
    assert!(second.is_complete());
}

#[test]
fn test_login_lost_to_another_session_is_recovered() {
    let card = SimulatedCard::seeded(&VECTOR1_SEED);
    let keystore = keystore(&card);
    let public_key = public_key_at(&VECTOR1_SEED, &address_path(0, 0));

    let mut first = p2pkh_spend(public_key, (0, 0));
    assert_eq!(keystore.sign_transaction(&mut first).unwrap(), 1);

    // Selecting the applet again from elsewhere logs the card out
    drop(open_session(&card));
    assert!(keystore.session().lock().is_pin_verified());

    let mut second = p2pkh_spend(public_key, (0, 0));
    assert_eq!(keystore.sign_transaction(&mut second).unwrap(), 1);
    let verifies = card.state().instructions.iter().filter(|&&ins| ins == 0x42).count();
    assert_eq!(verifies, 2);
}
