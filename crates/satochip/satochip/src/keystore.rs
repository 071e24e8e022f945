//! Signing orchestrator
//!
//! Walks a transaction input by input: derive the key on the card, have the
//! card parse the preimage, check its hash, run the 2FA round trip when the
//! card asks for it, sign and normalize. Signatures are staged and attached
//! only once every input has been signed, so a failure leaves the transaction
//! untouched.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use k256::ecdsa::VerifyingKey;
use parking_lot::Mutex;
use satochip_apdu_core::CardTransport;
use tracing::{debug, info, trace};

use crate::constants::{CHALLENGE_RESPONSE_LENGTH, DEFAULT_COIN_TYPE, HARDENED};
use crate::crypto::sha256d;
use crate::error::{Error, IntegrityError, Result};
use crate::parser::{self, ParsedTransaction};
use crate::path::KeyPath;
use crate::session::CardSession;
use crate::transaction::{InputType, SIGHASH_ALL, SighashCache, Transaction};
use crate::two_factor::{ChallengeResponder, TwoFactorAbort, TwoFactorMessage, parse_reply};
use crate::types::XpubType;

/// Default time the second device has to answer
pub const DEFAULT_TWO_FACTOR_TIMEOUT: Duration = Duration::from_secs(180);

/// Keystore configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeystoreConfig {
    /// Account path every address is derived below
    pub account_path: KeyPath,
    /// SLIP-44 coin type reported to the second device
    pub coin_type: u32,
    /// Whether the wallet runs on testnet
    pub testnet: bool,
    /// How long to wait for a 2FA reply
    pub two_factor_timeout: Duration,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            account_path: KeyPath::from_indices(vec![
                44 | HARDENED,
                DEFAULT_COIN_TYPE | HARDENED,
                HARDENED,
            ]),
            coin_type: DEFAULT_COIN_TYPE,
            testnet: false,
            two_factor_timeout: DEFAULT_TWO_FACTOR_TIMEOUT,
        }
    }
}

impl KeystoreConfig {
    /// Set the account path
    pub fn with_account_path(mut self, account_path: KeyPath) -> Self {
        self.account_path = account_path;
        self
    }

    /// Set the coin type
    pub const fn with_coin_type(mut self, coin_type: u32) -> Self {
        self.coin_type = coin_type;
        self
    }

    /// Select testnet
    pub const fn with_testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    /// Set the 2FA reply timeout
    pub const fn with_two_factor_timeout(mut self, timeout: Duration) -> Self {
        self.two_factor_timeout = timeout;
        self
    }
}

/// Where signing of one input stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningStage {
    /// Nothing sent yet
    Start,
    /// GET EXTENDED KEY
    DerivingKey,
    /// PARSE TRANSACTION
    ParsingPreimage,
    /// Waiting on the second device
    AwaitingChallengeResponse,
    /// SIGN TRANSACTION
    Signing,
    /// Low-S normalization and verification
    Normalizing,
    /// Signature staged for the transaction
    Attached,
}

impl fmt::Display for SigningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Signing job for one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRequest {
    /// Input index
    pub input: usize,
    /// Key position within the input
    pub key_position: usize,
    /// Full derivation path of the key
    pub path: KeyPath,
    /// Double SHA-256 of the preimage
    pub preimage_hash: [u8; 32],
    /// 2FA challenge-response, when the card requires one
    pub challenge_response: Option<[u8; CHALLENGE_RESPONSE_LENGTH]>,
}

/// Wallet-facing signer backed by a card session
pub struct Keystore<T: CardTransport> {
    session: Arc<Mutex<CardSession<T>>>,
    config: KeystoreConfig,
    responder: Option<Arc<dyn ChallengeResponder>>,
}

impl<T: CardTransport> fmt::Debug for Keystore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keystore")
            .field("config", &self.config)
            .field("responder", &self.responder.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: CardTransport> Keystore<T> {
    /// Create a keystore over a shared session
    pub fn new(session: Arc<Mutex<CardSession<T>>>, config: KeystoreConfig) -> Self {
        Self {
            session,
            config,
            responder: None,
        }
    }

    /// Use `responder` for cards that require 2FA
    pub fn with_responder(mut self, responder: Arc<dyn ChallengeResponder>) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Shared session handle
    pub fn session(&self) -> &Arc<Mutex<CardSession<T>>> {
        &self.session
    }

    /// Configuration
    pub const fn config(&self) -> &KeystoreConfig {
        &self.config
    }

    fn address_path(&self, (change, index): (u32, u32)) -> KeyPath {
        self.config.account_path.child(change).child(index)
    }

    /// Export the extended public key at `path`
    pub fn xpub(&self, path: &KeyPath, xtype: XpubType) -> Result<String> {
        let key = self.session.lock().extended_key(path)?;
        Ok(key.to_xpub(xtype, self.config.testnet))
    }

    /// Sign `message` with the address key `(change, index)`
    ///
    /// Returns a 65-byte compact recoverable signature.
    pub fn sign_message(&self, address: (u32, u32), message: &[u8]) -> Result<[u8; 65]> {
        let path = self.address_path(address);
        let mut session = self.session.lock();
        let (public_key, _) = session.derive_key(&path)?;
        let der = session.sign_message_raw(message)?;
        let signature = parser::parse_message_signature(&der, &public_key, message)?;
        info!(%path, "Message signed");
        Ok(signature)
    }

    /// Sign every input this wallet holds a key for
    ///
    /// Fully signed inputs are skipped. Nothing is attached unless every
    /// remaining input was signed; the number of signatures added is returned.
    pub fn sign_transaction(&self, tx: &mut Transaction) -> Result<usize> {
        let cache = SighashCache::new(tx);
        let mut staged = Vec::new();

        for (index, input) in tx.inputs.iter().enumerate() {
            if input.is_complete() {
                trace!(input = index, "Input already signed");
                continue;
            }
            if input.input_type == InputType::Coinbase {
                return Err(Error::CoinbaseInput(index));
            }
            let (key_position, candidate, derivation) =
                input.signing_key().ok_or(Error::NoMatchingKey(index))?;

            let preimage = cache.preimage(tx, index);
            let mut request = SignatureRequest {
                input: index,
                key_position,
                path: self.address_path(derivation),
                preimage_hash: sha256d(&preimage),
                challenge_response: None,
            };

            let mut signature =
                self.sign_input(tx, &cache, &mut request, &preimage, &candidate.public_key)?;
            signature.push(SIGHASH_ALL as u8);
            trace!(input = index, stage = %SigningStage::Attached, "Signature staged");
            staged.push((request.input, request.key_position, signature));
        }

        let count = staged.len();
        for (input, position, signature) in staged {
            tx.add_signature(input, position, signature);
        }
        info!(signatures = count, complete = tx.is_complete(), "Transaction signed");
        Ok(count)
    }

    fn sign_input(
        &self,
        tx: &Transaction,
        cache: &SighashCache,
        request: &mut SignatureRequest,
        preimage: &[u8],
        expected_key: &[u8; 33],
    ) -> Result<Vec<u8>> {
        let input = &tx.inputs[request.input];
        let segwit = input.input_type.is_segwit();
        trace!(input = request.input, stage = %SigningStage::Start, path = %request.path);

        let mut session = self.session.lock();
        let (public_key, parsed) =
            derive_and_parse(&mut *session, request, preimage, segwit, expected_key)?;

        if parsed.needs_2fa {
            trace!(input = request.input, stage = %SigningStage::AwaitingChallengeResponse);
            let message = TwoFactorMessage {
                tx: hex::encode(preimage),
                ct: self.config.coin_type,
                tn: self.config.testnet,
                sw: segwit,
                txo: segwit.then(|| hex::encode(cache.outputs_with_count(tx.outputs.len()))),
                ty: segwit.then(|| input.input_type.as_str()),
            };
            let two_factor_request = session.encrypt_2fa(&message.to_json())?;
            let responder = self
                .responder
                .clone()
                .ok_or(TwoFactorAbort::NoResponder)?;

            // The session lock is released while the second device decides
            drop(session);
            let reply = responder.challenge(&two_factor_request, self.config.two_factor_timeout)?;
            session = self.session.lock();

            let decrypted = session.decrypt_2fa(&reply)?;
            let challenge_response = parse_reply(&decrypted, &hex::encode(request.preimage_hash))?;
            request.challenge_response = Some(challenge_response);

            if session.current_key(&request.path) != Some(&public_key)
                || session.last_parsed() != Some(&request.preimage_hash)
            {
                debug!(input = request.input, "Card state changed during 2FA, replaying");
                derive_and_parse(&mut *session, request, preimage, segwit, expected_key)?;
            }
        }

        trace!(input = request.input, stage = %SigningStage::Signing);
        let der = session
            .sign_transaction_hash(&request.preimage_hash, request.challenge_response.as_ref())?;

        trace!(input = request.input, stage = %SigningStage::Normalizing);
        let signature =
            parser::parse_transaction_signature(&der, &public_key, &request.preimage_hash)?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

/// Derive the input key and have the card parse the preimage
///
/// Leaves the card with the key as current key and the preimage as last
/// parsed transaction.
fn derive_and_parse<T: CardTransport>(
    session: &mut CardSession<T>,
    request: &SignatureRequest,
    preimage: &[u8],
    segwit: bool,
    expected_key: &[u8; 33],
) -> Result<(VerifyingKey, ParsedTransaction)> {
    trace!(input = request.input, stage = %SigningStage::DerivingKey);
    let (public_key, _) = session.derive_key(&request.path)?;
    let derived = public_key.to_encoded_point(true);
    if derived.as_bytes() != expected_key {
        return Err(IntegrityError::KeyMismatch {
            expected: hex::encode(expected_key),
            derived: hex::encode(derived.as_bytes()),
        }
        .into());
    }

    trace!(input = request.input, stage = %SigningStage::ParsingPreimage);
    let parsed = session.parse_transaction(preimage, segwit)?;
    if parsed.hash != request.preimage_hash {
        return Err(IntegrityError::HashMismatch {
            expected: hex::encode(request.preimage_hash),
            reported: hex::encode(parsed.hash),
        }
        .into());
    }
    Ok((public_key, parsed))
}
