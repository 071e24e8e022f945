//! Common test utilities: an in-memory Satochip and a scripted second device
#![allow(dead_code, unreachable_pub)]

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use aes::Aes128;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use k256::ecdsa::signature::Signer;
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::{Signature, SigningKey};
use k256::elliptic_curve::PrimeField;
use k256::{FieldBytes, Scalar};
use parking_lot::{Mutex, MutexGuard};
use satochip::crypto::{sha256, sha256d};
use satochip::transaction::p2pkh_script;
use satochip::{
    CandidateKey, CardSession, ChallengeResponder, InputType, OutPoint, PinPrompt,
    ProvisioningHandler, SeedAction, SeedFormat, Transaction, TwoFactorAbort, TwoFactorRequest,
    TxInput, TxOutput, VersionMismatch,
};
use satochip_apdu_core::{CardTransport, TransportError};
use sha2::{Sha256, Sha512};
use zeroize::Zeroizing;

pub const HARDENED: u32 = 0x8000_0000;
pub const TEST_PIN: &str = "1234";
/// BIP32 test vector 1
pub const VECTOR1_SEED: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
    0x0f,
];

fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut mac = Hmac::<Sha512>::new_from_slice(key).unwrap();
    mac.update(data);
    let mut out = [0u8; 64];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn compressed(key: &SigningKey) -> [u8; 33] {
    let mut out = [0u8; 33];
    out.copy_from_slice(key.verifying_key().to_encoded_point(true).as_bytes());
    out
}

fn prefixed(out: &mut Vec<u8>, value: &[u8]) {
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
}

fn der_sign(key: &SigningKey, message: &[u8]) -> Vec<u8> {
    let signature: Signature = key.sign(message);
    signature.to_der().as_bytes().to_vec()
}

fn high_s(signature: Signature) -> Signature {
    Signature::from_scalars(signature.r(), -*signature.s()).unwrap()
}

/// Private extended key, BIP32 CKDpriv
#[derive(Clone)]
pub struct XPrv {
    pub key: SigningKey,
    pub chain_code: [u8; 32],
}

impl XPrv {
    pub fn master(seed: &[u8]) -> Self {
        let i = hmac_sha512(b"Bitcoin seed", seed);
        Self {
            key: SigningKey::from_slice(&i[..32]).unwrap(),
            chain_code: i[32..].try_into().unwrap(),
        }
    }

    pub fn child(&self, index: u32) -> Self {
        let mut data = Vec::with_capacity(37);
        if index & HARDENED != 0 {
            data.push(0);
            data.extend_from_slice(&self.key.to_bytes());
        } else {
            data.extend_from_slice(&compressed(&self.key));
        }
        data.extend_from_slice(&index.to_be_bytes());

        let i = hmac_sha512(&self.chain_code, &data);
        let tweak = Scalar::from_repr(FieldBytes::clone_from_slice(&i[..32])).unwrap();
        let child = tweak + **self.key.as_nonzero_scalar();
        Self {
            key: SigningKey::from_bytes(&child.to_bytes()).unwrap(),
            chain_code: i[32..].try_into().unwrap(),
        }
    }

    pub fn derive(&self, path: &[u32]) -> Self {
        path.iter().fold(self.clone(), |key, index| key.child(*index))
    }

    pub fn public_key(&self) -> [u8; 33] {
        compressed(&self.key)
    }
}

/// Compressed public key at `path` below the master key of `seed`
pub fn public_key_at(seed: &[u8], path: &[u32]) -> [u8; 33] {
    XPrv::master(seed).derive(path).public_key()
}

/// Default account path `m/44'/2'/0'` followed by `change/index`
pub fn address_path(change: u32, index: u32) -> Vec<u32> {
    vec![44 | HARDENED, 2 | HARDENED, HARDENED, change, index]
}

pub fn two_factor_key(secret: &[u8; 20]) -> [u8; 16] {
    hmac_sha256(secret, b"key_2FA")[..16].try_into().unwrap()
}

pub fn two_factor_id(secret: &[u8; 20]) -> [u8; 20] {
    hmac_sha256(secret, b"id_2FA")[..20].try_into().unwrap()
}

pub fn challenge_response(secret: &[u8; 20], hash: &[u8; 32]) -> [u8; 20] {
    hmac_sha256(secret, hash)[..20].try_into().unwrap()
}

enum Crypt {
    Encrypt(cbc::Encryptor<Aes128>),
    Decrypt(cbc::Decryptor<Aes128>),
}

/// Everything the simulated card remembers
pub struct CardState {
    pub pin: Option<Vec<u8>>,
    pub pin_tries: u8,
    pub verified: bool,
    pub master: Option<XPrv>,
    pub two_factor_secret: Option<[u8; 20]>,
    pub protocol: (u8, u8),
    pub removed: bool,

    /// Report a hash that differs from the preimage's
    pub tamper_tx_hash: bool,
    /// Return high-S signatures
    pub high_s: bool,
    /// Answer the next derivation without flush with "cache full"
    pub cache_full_once: bool,

    /// Instruction bytes received, in order
    pub instructions: Vec<u8>,
    pub flushes: usize,

    current: Option<SigningKey>,
    parsed_hash: Option<[u8; 32]>,
    buffer: Vec<u8>,
    crypt: Option<Crypt>,
}

impl CardState {
    fn blank() -> Self {
        Self {
            pin: None,
            pin_tries: 5,
            verified: false,
            master: None,
            two_factor_secret: None,
            protocol: (0, 12),
            removed: false,
            tamper_tx_hash: false,
            high_s: false,
            cache_full_once: false,
            instructions: Vec::new(),
            flushes: 0,
            current: None,
            parsed_hash: None,
            buffer: Vec::new(),
            crypt: None,
        }
    }

    fn authentikey(&self) -> Option<SigningKey> {
        let master = self.master.as_ref()?;
        let mut material = master.key.to_bytes().to_vec();
        material.extend_from_slice(b"authentikey");
        SigningKey::from_slice(&sha256(&material)).ok()
    }

    /// Whether an instruction was received
    pub fn received(&self, ins: u8) -> bool {
        self.instructions.contains(&ins)
    }

    fn process(&mut self, apdu: &[u8]) -> (Vec<u8>, u16) {
        let (cla, ins, p1, p2) = (apdu[0], apdu[1], apdu[2], apdu[3]);
        let data = if apdu.len() > 4 {
            &apdu[5..5 + apdu[4] as usize]
        } else {
            &[][..]
        };
        self.instructions.push(ins);

        match (cla, ins) {
            (0x00, 0xA4) if data == b"SatoChip" => self.select(),
            (0x00, 0xA4) => (vec![], 0x6A82),
            (0xB0, 0x3C) => self.status(),
            (0xB0, 0x2A) => self.setup(data),
            (0xB0, 0x42) => self.verify_pin(data),
            (0xB0, 0x73) => self.get_authentikey(),
            (0xB0, 0x76) => self.crypt(p1, p2, data),
            (0xB0, _) if !self.verified => (vec![], 0x9C06),
            (0xB0, 0x6C) => self.import_seed(data),
            (0xB0, 0x6D) => self.extended_key(p1, p2, data),
            (0xB0, 0x71) => self.parse_transaction(p1, data),
            (0xB0, 0x6F) => self.sign_transaction(data),
            (0xB0, 0x6E) => self.sign_message(p2, data),
            _ => (vec![], 0x6D00),
        }
    }

    /// Selecting the applet logs out and drops per-login state
    fn select(&mut self) -> (Vec<u8>, u16) {
        self.verified = false;
        self.current = None;
        self.parsed_hash = None;
        self.buffer.clear();
        self.crypt = None;
        (vec![], 0x9000)
    }

    fn status(&self) -> (Vec<u8>, u16) {
        if self.pin.is_none() {
            return (vec![], 0x9C04);
        }
        let payload = vec![
            self.protocol.0,
            self.protocol.1,
            0,
            5,
            self.pin_tries,
            1,
            1,
            1,
            u8::from(self.two_factor_secret.is_some()),
            u8::from(self.master.is_some()),
            1,
            0,
        ];
        (payload, 0x9000)
    }

    fn setup(&mut self, data: &[u8]) -> (Vec<u8>, u16) {
        if self.pin.is_some() {
            return (vec![], 0x9C07);
        }
        let mut reader = Reader(data);
        assert_eq!(reader.lv(), b"Muscle00");
        let _tries = reader.take(2);
        let pin = reader.lv().to_vec();
        let _puk = reader.lv();
        let _tries = reader.take(2);
        let _pin1 = reader.lv();
        let _puk1 = reader.lv();
        let _memory_and_acl = reader.take(7);
        if reader.0.len() >= 30 {
            assert_eq!(reader.take(2), &[0x80, 0x00]);
            self.two_factor_secret = Some(reader.take(20).try_into().unwrap());
            assert_eq!(reader.take(8), &[0u8; 8]);
        }

        self.pin = Some(pin);
        self.pin_tries = 5;
        (vec![], 0x9000)
    }

    fn verify_pin(&mut self, data: &[u8]) -> (Vec<u8>, u16) {
        let Some(pin) = &self.pin else {
            return (vec![], 0x9C04);
        };
        if self.pin_tries == 0 {
            return (vec![], 0x9C0C);
        }
        if data == pin.as_slice() {
            self.pin_tries = 5;
            self.verified = true;
            (vec![], 0x9000)
        } else {
            self.pin_tries -= 1;
            self.verified = false;
            (vec![], 0x63C0 | u16::from(self.pin_tries))
        }
    }

    fn authentikey_payload(&self) -> Vec<u8> {
        let Some(authentikey) = self.authentikey() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        prefixed(&mut out, &compressed(&authentikey)[1..]);
        let signature = der_sign(&authentikey, &out);
        prefixed(&mut out, &signature);
        out
    }

    fn get_authentikey(&self) -> (Vec<u8>, u16) {
        if self.master.is_none() {
            return (vec![], 0x9C14);
        }
        (self.authentikey_payload(), 0x9000)
    }

    fn import_seed(&mut self, data: &[u8]) -> (Vec<u8>, u16) {
        if self.master.is_some() {
            return (vec![], 0x9C17);
        }
        self.master = Some(XPrv::master(data));
        (self.authentikey_payload(), 0x9000)
    }

    fn extended_key(&mut self, depth: u8, options: u8, data: &[u8]) -> (Vec<u8>, u16) {
        let (Some(master), Some(authentikey)) = (self.master.clone(), self.authentikey()) else {
            return (vec![], 0x9C14);
        };
        if self.cache_full_once {
            if options & 0x80 == 0 {
                return (vec![], 0x9C01);
            }
            self.cache_full_once = false;
        }
        if options & 0x80 != 0 {
            self.flushes += 1;
        }
        assert_eq!(data.len(), 4 * depth as usize);

        let path: Vec<u32> = data
            .chunks(4)
            .map(|c| u32::from_be_bytes(c.try_into().unwrap()))
            .collect();
        let key = master.derive(&path);

        let mut out = key.chain_code.to_vec();
        prefixed(&mut out, &key.public_key()[1..]);
        let self_signature = der_sign(&key.key, &out);
        prefixed(&mut out, &self_signature);
        let auth_signature = der_sign(&authentikey, &out);
        prefixed(&mut out, &auth_signature);

        self.current = Some(key.key);
        (out, 0x9000)
    }

    fn chunk(data: &[u8]) -> &[u8] {
        let len = u16::from_be_bytes([data[0], data[1]]) as usize;
        &data[2..2 + len]
    }

    fn parse_transaction(&mut self, phase: u8, data: &[u8]) -> (Vec<u8>, u16) {
        match phase {
            0x01 => {
                self.buffer.clear();
                self.parsed_hash = None;
                (vec![], 0x9000)
            }
            0x02 => {
                self.buffer.extend_from_slice(Self::chunk(data));
                (vec![], 0x9000)
            }
            0x03 => {
                self.buffer.extend_from_slice(Self::chunk(data));
                let mut hash = sha256d(&self.buffer);
                if self.tamper_tx_hash {
                    hash[0] ^= 0x01;
                }
                self.parsed_hash = Some(hash);

                let mut inner = hash.to_vec();
                inner.push(u8::from(self.two_factor_secret.is_some()));
                let mut out = Vec::new();
                prefixed(&mut out, &inner);
                let Some(authentikey) = self.authentikey() else {
                    return (vec![], 0x9C14);
                };
                let signature = der_sign(&authentikey, &out);
                prefixed(&mut out, &signature);
                (out, 0x9000)
            }
            _ => (vec![], 0x9C10),
        }
    }

    fn sign_transaction(&mut self, data: &[u8]) -> (Vec<u8>, u16) {
        let hash: [u8; 32] = data[..32].try_into().unwrap();
        if self.parsed_hash != Some(hash) {
            return (vec![], 0x9C15);
        }
        if let Some(secret) = &self.two_factor_secret {
            if data.len() != 52 || data[32..] != challenge_response(secret, &hash) {
                return (vec![], 0x9C0B);
            }
        }
        let Some(key) = &self.current else {
            return (vec![], 0x9C0E);
        };

        let signature: Signature = key.sign_prehash(&hash).unwrap();
        let signature = if self.high_s { high_s(signature) } else { signature };
        (signature.to_der().as_bytes().to_vec(), 0x9000)
    }

    fn sign_message(&mut self, phase: u8, data: &[u8]) -> (Vec<u8>, u16) {
        match phase {
            0x01 => {
                self.buffer.clear();
                (vec![], 0x9000)
            }
            0x02 => {
                self.buffer.extend_from_slice(Self::chunk(data));
                (vec![], 0x9000)
            }
            0x03 => {
                self.buffer.extend_from_slice(Self::chunk(data));
                let Some(key) = &self.current else {
                    return (vec![], 0x9C0E);
                };
                let signature: Signature = key.sign(&self.buffer);
                let signature = if self.high_s { high_s(signature) } else { signature };
                (signature.to_der().as_bytes().to_vec(), 0x9000)
            }
            _ => (vec![], 0x9C11),
        }
    }

    fn crypt(&mut self, phase: u8, mode: u8, data: &[u8]) -> (Vec<u8>, u16) {
        let Some(secret) = self.two_factor_secret else {
            return (vec![], 0x9C19);
        };
        let key = two_factor_key(&secret);

        match (phase, mode) {
            (0x01, 0x02) => {
                let iv: [u8; 16] = rand::random();
                self.crypt = Some(Crypt::Encrypt(cbc::Encryptor::new(
                    &key.into(),
                    &iv.into(),
                )));
                let mut out = iv.to_vec();
                out.extend_from_slice(&two_factor_id(&secret));
                (out, 0x9000)
            }
            (0x01, 0x01) => {
                self.crypt = Some(Crypt::Decrypt(cbc::Decryptor::new(
                    &key.into(),
                    GenericArray::from_slice(data),
                )));
                (vec![], 0x9000)
            }
            (0x02 | 0x03, _) => {
                let mut blocks = Self::chunk(data).to_vec();
                for block in blocks.chunks_mut(16) {
                    let block = GenericArray::from_mut_slice(block);
                    match self.crypt.as_mut() {
                        Some(Crypt::Encrypt(cipher)) => cipher.encrypt_block_mut(block),
                        Some(Crypt::Decrypt(cipher)) => cipher.decrypt_block_mut(block),
                        None => return (vec![], 0x9C12),
                    }
                }
                if phase == 0x03 {
                    self.crypt = None;
                }
                let mut out = Vec::new();
                prefixed(&mut out, &blocks);
                (out, 0x9000)
            }
            _ => (vec![], 0x9C10),
        }
    }
}

struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> &'a [u8] {
        let (head, tail) = self.0.split_at(n);
        self.0 = tail;
        head
    }

    fn lv(&mut self) -> &'a [u8] {
        let len = self.take(1)[0] as usize;
        self.take(len)
    }
}

/// Transport backed by a shared [`CardState`]
///
/// Clones talk to the same card, so a test can keep one to inspect the card
/// while a session owns the other.
#[derive(Clone)]
pub struct SimulatedCard {
    state: Arc<Mutex<CardState>>,
    connected: bool,
}

impl fmt::Debug for SimulatedCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedCard")
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl SimulatedCard {
    /// Card fresh from the factory
    pub fn blank() -> Self {
        Self {
            state: Arc::new(Mutex::new(CardState::blank())),
            connected: true,
        }
    }

    /// Card set up with [`TEST_PIN`] and without a seed
    pub fn unseeded() -> Self {
        let card = Self::blank();
        card.state().pin = Some(TEST_PIN.as_bytes().to_vec());
        card
    }

    /// Card set up with [`TEST_PIN`] and loaded with `seed`
    pub fn seeded(seed: &[u8]) -> Self {
        let card = Self::unseeded();
        card.state().master = Some(XPrv::master(seed));
        card
    }

    /// Enable 2FA with `secret`
    pub fn with_two_factor(self, secret: [u8; 20]) -> Self {
        self.state().two_factor_secret = Some(secret);
        self
    }

    pub fn state(&self) -> MutexGuard<'_, CardState> {
        self.state.lock()
    }
}

impl CardTransport for SimulatedCard {
    type Error = TransportError;

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Self::Error> {
        if !self.connected {
            return Err(TransportError::Connection);
        }
        let mut state = self.state.lock();
        if state.removed {
            return Err(TransportError::CardRemoved);
        }
        let (mut payload, sw) = state.process(command);
        payload.extend_from_slice(&sw.to_be_bytes());
        Ok(Bytes::from(payload))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn reset(&mut self) -> Result<(), Self::Error> {
        self.connected = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        Ok(())
    }
}

/// Open a session on `card` with [`TEST_PIN`] cached
pub fn open_session(card: &SimulatedCard) -> CardSession<SimulatedCard> {
    let mut session = CardSession::open(card.clone()).unwrap();
    session.set_pin(Zeroizing::new(TEST_PIN.as_bytes().to_vec()));
    session
}

/// One-input, one-output P2PKH spend of the key at `(change, index)`
pub fn p2pkh_spend(public_key: [u8; 33], derivation: (u32, u32)) -> Transaction {
    Transaction {
        version: 2,
        inputs: vec![spend_input(public_key, derivation, InputType::P2pkh, 0)],
        outputs: vec![TxOutput {
            value: 40_000,
            script_pubkey: p2pkh_script(&[0x02; 33]),
        }],
        lock_time: 0,
    }
}

pub fn spend_input(
    public_key: [u8; 33],
    derivation: (u32, u32),
    input_type: InputType,
    vout: u32,
) -> TxInput {
    TxInput::single_key(
        OutPoint {
            txid: [0x07; 32],
            vout,
        },
        input_type,
        50_000,
        CandidateKey {
            public_key,
            derivation: Some(derivation),
        },
    )
}

/// How the second device answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Approve,
    Reject,
    WrongHash,
    Silent,
}

/// Second device sharing the 2FA secret with the card
#[derive(Debug)]
pub struct SecondDevice {
    secret: [u8; 20],
    answer: Answer,
    pub seen: Mutex<Vec<serde_json::Value>>,
}

impl SecondDevice {
    pub fn new(secret: [u8; 20], answer: Answer) -> Self {
        Self {
            secret,
            answer,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Decrypt a request, decide, and encrypt the reply
    pub fn reply(&self, request: &TwoFactorRequest) -> String {
        let key = two_factor_key(&self.secret);
        assert_eq!(request.id, hex::encode(two_factor_id(&self.secret)));

        let data = BASE64.decode(&request.payload).unwrap();
        let (iv, ciphertext) = data.split_at(16);
        let plaintext = cbc::Decryptor::<Aes128>::new(&key.into(), GenericArray::from_slice(iv))
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .unwrap();
        let message: serde_json::Value = serde_json::from_slice(&plaintext).unwrap();
        let preimage = hex::decode(message["tx"].as_str().unwrap()).unwrap();
        self.seen.lock().push(message);

        let mut hash = sha256d(&preimage);
        let response = match self.answer {
            Answer::Reject => "0".repeat(40),
            _ => hex::encode(challenge_response(&self.secret, &hash)),
        };
        if self.answer == Answer::WrongHash {
            hash[31] ^= 0xFF;
        }
        let reply = format!("{}:{}", hex::encode(hash), response);

        let iv: [u8; 16] = rand::random();
        let ciphertext = cbc::Encryptor::<Aes128>::new(&key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(reply.as_bytes());
        BASE64.encode([iv.as_slice(), ciphertext.as_slice()].concat())
    }
}

impl ChallengeResponder for SecondDevice {
    fn challenge(
        &self,
        request: &TwoFactorRequest,
        timeout: Duration,
    ) -> Result<String, TwoFactorAbort> {
        if self.answer == Answer::Silent {
            return Err(TwoFactorAbort::Timeout(timeout));
        }
        Ok(self.reply(request))
    }
}

/// Provisioning handler replaying canned answers
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    pub pins: VecDeque<String>,
    pub two_factor: bool,
    pub two_factor_secret: Option<String>,
    pub seed_action: Option<SeedAction>,
    pub shown_mnemonic: Option<String>,
    pub restore: Option<(String, SeedFormat)>,
    pub passphrase: String,
    pub errors: Vec<String>,
    pub warnings: Vec<VersionMismatch>,
    pub pin_prompts: Vec<PinPrompt>,
}

impl ScriptedHandler {
    pub fn with_pins(pins: &[&str]) -> Self {
        Self {
            pins: pins.iter().map(|pin| pin.to_string()).collect(),
            ..Default::default()
        }
    }
}

impl ProvisioningHandler for ScriptedHandler {
    fn request_pin(&mut self, prompt: PinPrompt) -> Option<String> {
        self.pin_prompts.push(prompt);
        self.pins.pop_front()
    }

    fn choose_two_factor(&mut self) -> Option<bool> {
        Some(self.two_factor)
    }

    fn show_two_factor_secret(&mut self, secret_hex: &str) -> bool {
        self.two_factor_secret = Some(secret_hex.to_string());
        true
    }

    fn choose_seed_action(&mut self) -> Option<SeedAction> {
        self.seed_action
    }

    fn show_mnemonic(&mut self, phrase: &str) {
        self.shown_mnemonic = Some(phrase.to_string());
    }

    fn confirm_mnemonic(&mut self) -> Option<String> {
        self.shown_mnemonic.clone()
    }

    fn request_passphrase(&mut self) -> Option<String> {
        Some(self.passphrase.clone())
    }

    fn request_seed(&mut self) -> Option<(String, SeedFormat)> {
        self.restore.take()
    }

    fn warn_version(&mut self, mismatch: &VersionMismatch) {
        self.warnings.push(*mismatch);
    }

    fn show_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
}
