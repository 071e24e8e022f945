//! Card session: one selected applet behind one transport
//!
//! The session owns the transport and everything the driver remembers about
//! the card between commands: the cached PIN, the authentikey, the last known
//! setup state and what the card's "current key" and "last parsed
//! transaction" slots hold.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::{Bytes, BytesMut};
use cipher::block_padding::{Pkcs7, RawPadding};
use k256::ecdsa::VerifyingKey;
use satochip_apdu_core::{
    ApduCommand, CardExecutor, CardTransport, ResponseError, utils::PayloadReader,
};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::commands::{
    Crypt2faCommand, Crypt2faOk, CryptMode, GetAuthentikeyCommand, GetAuthentikeyOk,
    GetExtendedKeyCommand, GetExtendedKeyError, GetExtendedKeyOk, GetStatusCommand, GetStatusOk,
    ImportSeedCommand, ImportSeedOk, ParseTransactionCommand, ParseTransactionOk, SelectCommand,
    SetupCommand, SetupParams, SignMessageCommand, SignMessageOk, SignTransactionCommand,
    SignTransactionOk, VerifyPinCommand,
};
use crate::constants::{CHALLENGE_RESPONSE_LENGTH, KEY_NUMBER_BIP32};
use crate::error::{Error, IntegrityError, Result};
use crate::parser::{self, ParsedTransaction};
use crate::path::KeyPath;
use crate::two_factor::TwoFactorRequest;
use crate::types::{DeviceStatus, ExtendedKey};

/// AES block size used by the 2FA channel
const BLOCK_SIZE: usize = 16;
/// Length of the 2FA request id returned by the card
const TWO_FA_ID_LENGTH: usize = 20;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Closed; the transport has been released
    Closed,
    /// Applet selected, commands allowed
    Open,
    /// A link failure happened; the session must be recreated
    Invalid,
}

/// Setup state as last reported by the card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    /// Not queried yet
    Unknown,
    /// SETUP has not been run
    NotDone,
    /// SETUP done
    Done,
}

/// A session with a Satochip applet
#[derive(Debug)]
pub struct CardSession<T: CardTransport> {
    executor: CardExecutor<T>,
    state: SessionState,
    pin: Option<Zeroizing<Vec<u8>>>,
    pin_verified: bool,
    authentikey: Option<VerifyingKey>,
    setup: SetupState,
    status: Option<DeviceStatus>,
    current_key: Option<(KeyPath, VerifyingKey)>,
    last_parsed: Option<[u8; 32]>,
}

impl<T: CardTransport> CardSession<T> {
    /// Select the applet over `transport` and open a session
    pub fn open(transport: T) -> Result<Self> {
        let mut session = Self {
            executor: CardExecutor::new(transport),
            state: SessionState::Open,
            pin: None,
            pin_verified: false,
            authentikey: None,
            setup: SetupState::Unknown,
            status: None,
            current_key: None,
            last_parsed: None,
        };
        session.execute(&SelectCommand::satochip())?;
        info!("Satochip applet selected");
        Ok(session)
    }

    /// Current lifecycle state
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Underlying transport, for diagnostics such as the ATR
    pub const fn transport(&self) -> &T {
        self.executor.transport()
    }

    /// Number of APDUs exchanged in this session
    pub const fn command_counter(&self) -> u64 {
        self.executor.exchanges()
    }

    /// Authentikey, once fetched
    pub const fn cached_authentikey(&self) -> Option<&VerifyingKey> {
        self.authentikey.as_ref()
    }

    /// Last status read from the card
    pub const fn last_status(&self) -> Option<&DeviceStatus> {
        self.status.as_ref()
    }

    /// Setup state as last reported by the card
    pub const fn setup_state(&self) -> SetupState {
        self.setup
    }

    /// Seed the authentikey cache with a value stored by the wallet
    ///
    /// Responses that carry an authentikey signature are then verified
    /// against it from the first command on.
    pub fn trust_authentikey(&mut self, authentikey: VerifyingKey) {
        self.authentikey = Some(authentikey);
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            SessionState::Open => Ok(()),
            SessionState::Invalid => Err(Error::SessionInvalid),
            SessionState::Closed => Err(Error::SessionClosed),
        }
    }

    fn execute<C>(&mut self, command: &C) -> Result<C::Success>
    where
        C: ApduCommand,
        Error: From<C::Error>,
    {
        self.ensure_open()?;
        let result = self.executor.execute(command);
        self.settle(result)
    }

    /// Convert a command result, invalidating the session on link failures
    fn settle<S, E>(&mut self, result: std::result::Result<S, E>) -> Result<S>
    where
        Error: From<E>,
    {
        result.map_err(|e| {
            let error = Error::from(e);
            if error.invalidates_session() {
                warn!(%error, "Link failure, invalidating session");
                self.state = SessionState::Invalid;
            }
            error
        })
    }

    /// Check the card is still there by re-selecting the applet
    ///
    /// Any failure marks the session invalid. Re-selecting logs the PIN out
    /// and clears the card's current key and parsed transaction, so the
    /// session forgets them too.
    pub fn ping(&mut self) -> Result<()> {
        self.ensure_open()?;
        match self.executor.execute(&SelectCommand::satochip()) {
            Ok(_) => {
                self.pin_verified = false;
                self.current_key = None;
                self.last_parsed = None;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Ping failed, invalidating session");
                self.state = SessionState::Invalid;
                Err(e.into())
            }
        }
    }

    /// Release the transport and forget the PIN
    ///
    /// Safe to call more than once and after a failure.
    pub fn close(&mut self) {
        self.pin = None;
        self.pin_verified = false;
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        if let Err(error) = self.executor.close() {
            warn!(%error, "Failed to close transport");
        }
        debug!("Session closed");
    }

    /// Read the applet status; `None` when SETUP has not been run
    pub fn get_status(&mut self) -> Result<Option<DeviceStatus>> {
        match self.execute(&GetStatusCommand::new())? {
            GetStatusOk::Status(status) => {
                self.setup = if status.setup_done {
                    SetupState::Done
                } else {
                    SetupState::NotDone
                };
                if let Some(mismatch) = status.version_check().warning() {
                    warn!(%mismatch, "Card protocol version mismatch");
                }
                self.status = Some(status);
                Ok(Some(status))
            }
            GetStatusOk::SetupNotDone => {
                self.setup = SetupState::NotDone;
                Ok(None)
            }
        }
    }

    /// Run the one-time card SETUP; the new PIN is cached
    pub fn setup(&mut self, params: &SetupParams) -> Result<()> {
        let command = SetupCommand::with_params(params)?;
        self.execute(&command)?;
        self.setup = SetupState::Done;
        self.pin = Some(params.pin0.clone());
        self.pin_verified = false;
        info!(two_factor = params.two_factor.is_some(), "Card setup done");
        Ok(())
    }

    /// Cache the PIN used by [`verify_pin`](Self::verify_pin)
    pub fn set_pin(&mut self, pin: Zeroizing<Vec<u8>>) {
        self.pin = Some(pin);
        self.pin_verified = false;
    }

    /// Whether the cached PIN has been accepted by the card
    pub const fn is_pin_verified(&self) -> bool {
        self.pin_verified
    }

    /// Verify the cached PIN
    ///
    /// A wrong PIN is dropped from the cache so it is never retried.
    pub fn verify_pin(&mut self) -> Result<()> {
        let pin = self.pin.clone().ok_or(Error::PinRequired)?;
        match self.execute(&VerifyPinCommand::user(&pin)) {
            Ok(_) => {
                self.pin_verified = true;
                debug!("PIN verified");
                Ok(())
            }
            Err(error) => {
                if matches!(error, Error::WrongPin { .. } | Error::PinBlocked) {
                    self.pin = None;
                }
                self.pin_verified = false;
                Err(error)
            }
        }
    }

    fn ensure_pin(&mut self) -> Result<()> {
        if self.pin_verified {
            Ok(())
        } else {
            self.verify_pin()
        }
    }

    /// Run a PIN-gated operation
    ///
    /// When the card answers "PIN required" although the session thought it
    /// was logged in, the applet was reselected behind our back: the cached
    /// PIN is verified again and the operation retried once.
    fn with_pin<R>(&mut self, mut op: impl FnMut(&mut Self) -> Result<R>) -> Result<R> {
        self.ensure_pin()?;
        match op(self) {
            Err(Error::PinRequired) if self.pin.is_some() => {
                warn!("Card dropped the PIN login, verifying again");
                self.pin_verified = false;
                self.current_key = None;
                self.last_parsed = None;
                self.verify_pin()?;
                op(self)
            }
            result => result,
        }
    }

    fn remember_authentikey(&mut self, authentikey: VerifyingKey) -> Result<VerifyingKey> {
        match self.authentikey {
            Some(cached) if cached != authentikey => Err(IntegrityError::AuthentikeyChanged.into()),
            _ => {
                self.authentikey = Some(authentikey);
                Ok(authentikey)
            }
        }
    }

    /// Fetch the authentikey, the card identity key
    pub fn authentikey(&mut self) -> Result<VerifyingKey> {
        let GetAuthentikeyOk::Success { payload } = self.execute(&GetAuthentikeyCommand::new())?;
        let authentikey = parser::parse_authentikey(&payload)?;
        self.remember_authentikey(authentikey)
    }

    /// Import a BIP32 seed; returns the authentikey
    pub fn import_seed(&mut self, seed: &[u8]) -> Result<VerifyingKey> {
        let command = ImportSeedCommand::new(seed)?;
        let ImportSeedOk::Imported { payload } =
            self.with_pin(|session| session.execute(&command))?;
        let authentikey = parser::parse_authentikey(&payload)?;
        self.current_key = None;
        info!("Seed imported");
        self.remember_authentikey(authentikey)
    }

    /// Derive the key at `path`; it becomes the card's current key
    ///
    /// A full derivation cache is flushed and the request retried once.
    pub fn derive_key(&mut self, path: &KeyPath) -> Result<(VerifyingKey, [u8; 32])> {
        self.with_pin(|session| session.derive_key_verified(path))
    }

    fn derive_key_verified(&mut self, path: &KeyPath) -> Result<(VerifyingKey, [u8; 32])> {
        if self.authentikey.is_none() {
            self.authentikey()?;
        }

        let command = GetExtendedKeyCommand::new(path)?;
        self.ensure_open()?;
        let GetExtendedKeyOk::Success { payload } = match self.executor.execute(&command) {
            Err(GetExtendedKeyError::CacheFull) => {
                debug!(%path, "Key cache full, flushing");
                self.execute(&command.with_flush())?
            }
            result => self.settle(result)?,
        };

        let (public_key, chain_code) =
            parser::parse_extended_key(&payload, self.authentikey.as_ref())?;
        self.current_key = Some((path.clone(), public_key));
        debug!(%path, "Derived key");
        Ok((public_key, chain_code))
    }

    /// Key the card will sign with, if it is the one at `path`
    pub fn current_key(&self, path: &KeyPath) -> Option<&VerifyingKey> {
        self.current_key
            .as_ref()
            .filter(|(current, _)| current == path)
            .map(|(_, key)| key)
    }

    /// Derive `path` and its parent into an exportable extended key
    pub fn extended_key(&mut self, path: &KeyPath) -> Result<ExtendedKey> {
        let (parent_fingerprint, child_number) = match (path.parent(), path.child_number()) {
            (Some(parent), Some(child_number)) => {
                let (parent_key, parent_chain_code) = self.derive_key(&parent)?;
                let parent = ExtendedKey {
                    public_key: parent_key,
                    chain_code: parent_chain_code,
                    depth: 0,
                    parent_fingerprint: [0; 4],
                    child_number: 0,
                };
                (parent.fingerprint(), child_number)
            }
            _ => ([0; 4], 0),
        };

        let (public_key, chain_code) = self.derive_key(path)?;
        let (depth, _) = path.encode()?;
        Ok(ExtendedKey {
            public_key,
            chain_code,
            depth,
            parent_fingerprint,
            child_number,
        })
    }

    /// Send a transaction preimage to the card for hashing
    pub fn parse_transaction(
        &mut self,
        preimage: &[u8],
        segwit: bool,
    ) -> Result<ParsedTransaction> {
        self.with_pin(|session| session.parse_transaction_verified(preimage, segwit))
    }

    fn parse_transaction_verified(
        &mut self,
        preimage: &[u8],
        segwit: bool,
    ) -> Result<ParsedTransaction> {
        self.last_parsed = None;

        let mut result = None;
        for step in ParseTransactionCommand::sequence(preimage, segwit) {
            if let ParseTransactionOk::Parsed(payload) = self.execute(&step)? {
                result = Some(payload);
            }
        }
        let payload =
            result.ok_or_else(|| ResponseError::parse("no result from PARSE TRANSACTION"))?;
        let parsed = parser::parse_transaction_response(&payload, self.authentikey.as_ref())?;
        self.last_parsed = Some(parsed.hash);
        debug!(
            hash = %hex::encode(parsed.hash),
            needs_2fa = parsed.needs_2fa,
            "Transaction parsed"
        );
        Ok(parsed)
    }

    /// Hash of the transaction the card parsed last
    pub const fn last_parsed(&self) -> Option<&[u8; 32]> {
        self.last_parsed.as_ref()
    }

    /// Sign the last parsed transaction hash with the current key; raw DER
    pub fn sign_transaction_hash(
        &mut self,
        hash: &[u8; 32],
        challenge_response: Option<&[u8; CHALLENGE_RESPONSE_LENGTH]>,
    ) -> Result<Bytes> {
        let command = SignTransactionCommand::new(KEY_NUMBER_BIP32, hash, challenge_response);
        let SignTransactionOk::Signature(signature) =
            self.with_pin(|session| session.execute(&command))?;
        Ok(signature)
    }

    /// Sign `message` with the current key; raw DER over SHA-256(message)
    pub fn sign_message_raw(&mut self, message: &[u8]) -> Result<Bytes> {
        self.with_pin(|session| {
            let mut signature = None;
            for step in SignMessageCommand::sequence(KEY_NUMBER_BIP32, message) {
                if let SignMessageOk::Signature(der) = session.execute(&step)? {
                    signature = Some(der);
                }
            }
            signature.ok_or_else(|| ResponseError::parse("no signature from SIGN MESSAGE").into())
        })
    }

    /// Encrypt a 2FA request with the card's 2FA key
    pub fn encrypt_2fa(&mut self, message: &str) -> Result<TwoFactorRequest> {
        let Crypt2faOk::Success { payload } = self.execute(&Crypt2faCommand::init_encrypt())?;
        let mut reader = PayloadReader::new(&payload);
        let iv = reader.read_array::<BLOCK_SIZE>()?;
        let id = reader.read_array::<TWO_FA_ID_LENGTH>()?;

        let padded = pad(message.as_bytes());
        let ciphertext = self.crypt_chunks(CryptMode::Encrypt, &padded)?;

        let mut out = BytesMut::with_capacity(BLOCK_SIZE + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        let request = TwoFactorRequest {
            id: hex::encode(id),
            payload: BASE64.encode(&out),
        };
        debug!(id = %request.id, "2FA request encrypted");
        Ok(request)
    }

    /// Decrypt a 2FA reply with the card's 2FA key
    pub fn decrypt_2fa(&mut self, payload: &str) -> Result<String> {
        let data = BASE64
            .decode(payload.trim())
            .map_err(|_| ResponseError::parse("2FA reply is not base64"))?;
        if data.len() < 2 * BLOCK_SIZE || data.len() % BLOCK_SIZE != 0 {
            return Err(ResponseError::parse("2FA reply is not a whole number of blocks").into());
        }
        let (iv, ciphertext) = data.split_at(BLOCK_SIZE);
        let mut iv_block = [0u8; BLOCK_SIZE];
        iv_block.copy_from_slice(iv);

        self.execute(&Crypt2faCommand::init_decrypt(&iv_block))?;
        let plaintext = Zeroizing::new(self.crypt_chunks(CryptMode::Decrypt, ciphertext)?);
        let plaintext = unpad(&plaintext)?;
        String::from_utf8(plaintext)
            .map_err(|_| ResponseError::parse("2FA reply is not UTF-8").into())
    }

    fn crypt_chunks(&mut self, mode: CryptMode, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len());
        for step in Crypt2faCommand::chunks(mode, data) {
            let Crypt2faOk::Success { payload } = self.execute(&step)?;
            let mut reader = PayloadReader::new(&payload);
            out.extend_from_slice(reader.read_prefixed()?);
        }
        Ok(out)
    }
}

impl<T: CardTransport> Drop for CardSession<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// PKCS#7 pad the last block; the card only runs raw AES-CBC
fn pad(data: &[u8]) -> Vec<u8> {
    let full = data.len() - data.len() % BLOCK_SIZE;
    let mut last = [0u8; BLOCK_SIZE];
    let tail = &data[full..];
    last[..tail.len()].copy_from_slice(tail);
    Pkcs7::raw_pad(&mut last, tail.len());

    let mut out = Vec::with_capacity(full + BLOCK_SIZE);
    out.extend_from_slice(&data[..full]);
    out.extend_from_slice(&last);
    out
}

fn unpad(data: &[u8]) -> std::result::Result<Vec<u8>, ResponseError> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(ResponseError::parse("padded data is not block aligned"));
    }
    let (body, last) = data.split_at(data.len() - BLOCK_SIZE);
    let last = Pkcs7::raw_unpad(last).map_err(|_| ResponseError::parse("invalid padding"))?;
    let mut out = Vec::with_capacity(body.len() + last.len());
    out.extend_from_slice(body);
    out.extend_from_slice(last);
    Ok(out)
}
