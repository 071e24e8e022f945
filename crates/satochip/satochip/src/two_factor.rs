//! Second-factor challenge-response
//!
//! When the card flags a transaction as needing 2FA, a JSON description of
//! the transaction is encrypted by the card and handed to a
//! [`ChallengeResponder`]. The second device answers with an encrypted
//! `"<hash hex>:<challenge-response hex>"` which is decrypted by the card and
//! checked here before SIGN TRANSACTION.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use tracing::{debug, warn};

use crate::constants::{CHALLENGE_RESPONSE_LENGTH, REJECTED_CHALLENGE_RESPONSE};

/// Encrypted request for the second device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoFactorRequest {
    /// Request id (hex), derived by the card from the 2FA secret
    pub id: String,
    /// Base64 of `IV ‖ ciphertext`
    pub payload: String,
}

/// Encrypted reply from the second device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwoFactorReply {
    /// Id of the request this answers
    pub id: String,
    /// Base64 of `IV ‖ ciphertext`
    pub payload: String,
}

/// Why a challenge-response round trip did not yield a usable answer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TwoFactorAbort {
    /// No responder is configured for a card that requires 2FA
    #[error("no 2FA responder configured")]
    NoResponder,

    /// No reply arrived in time
    #[error("no reply from the second device within {0:?}")]
    Timeout(Duration),

    /// The reply channel is gone
    #[error("2FA channel disconnected")]
    Disconnected,

    /// The second device refused the transaction
    #[error("transaction rejected on the second device")]
    Rejected,

    /// The reply is for a different transaction
    #[error("2FA reply is for hash {received}, expected {expected}")]
    HashMismatch {
        /// Hash of the transaction being signed
        expected: String,
        /// Hash echoed by the second device
        received: String,
    },

    /// The reply could not be decoded
    #[error("malformed 2FA reply: {0}")]
    MalformedReply(String),

    /// The card refused the challenge-response
    #[error("challenge-response rejected by the card")]
    CardRejected,
}

/// Transaction description sent to the second device
#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorMessage<'a> {
    /// Preimage hex
    pub tx: String,
    /// SLIP-44 coin type
    pub ct: u32,
    /// Testnet flag
    pub tn: bool,
    /// Segwit flag
    pub sw: bool,
    /// Serialized outputs hex, segwit only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txo: Option<String>,
    /// Input script type, segwit only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ty: Option<&'a str>,
}

impl TwoFactorMessage<'_> {
    /// JSON text handed to the card for encryption
    pub fn to_json(&self) -> String {
        // Serializing a struct of strings and numbers cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Check a decrypted reply and extract the challenge-response
///
/// The reply must echo `expected_hash_hex`; the all-zero response is the
/// second device's refusal.
pub fn parse_reply(
    decrypted: &str,
    expected_hash_hex: &str,
) -> Result<[u8; CHALLENGE_RESPONSE_LENGTH], TwoFactorAbort> {
    let (hash, response) = decrypted
        .trim()
        .split_once(':')
        .ok_or_else(|| TwoFactorAbort::MalformedReply("missing ':' separator".into()))?;

    if !hash.eq_ignore_ascii_case(expected_hash_hex) {
        return Err(TwoFactorAbort::HashMismatch {
            expected: expected_hash_hex.to_string(),
            received: hash.to_string(),
        });
    }
    if response == REJECTED_CHALLENGE_RESPONSE {
        return Err(TwoFactorAbort::Rejected);
    }

    let mut out = [0u8; CHALLENGE_RESPONSE_LENGTH];
    hex::decode_to_slice(response, &mut out)
        .map_err(|e| TwoFactorAbort::MalformedReply(e.to_string()))?;
    Ok(out)
}

/// Delivers a request to the second device and waits for its reply
pub trait ChallengeResponder: Send + Sync {
    /// Send `request` and return the encrypted reply payload
    fn challenge(
        &self,
        request: &TwoFactorRequest,
        timeout: Duration,
    ) -> Result<String, TwoFactorAbort>;
}

/// Responder backed by a pair of channels
///
/// Requests go out on one channel; replies come back on the other and are
/// matched by id, replies to earlier requests are dropped.
#[derive(Debug)]
pub struct ChannelResponder {
    requests: Sender<TwoFactorRequest>,
    replies: Receiver<TwoFactorReply>,
}

/// The second-device end of a [`ChannelResponder`]
#[derive(Debug, Clone)]
pub struct ResponderEndpoint {
    /// Incoming requests
    pub requests: Receiver<TwoFactorRequest>,
    /// Outgoing replies
    pub replies: Sender<TwoFactorReply>,
}

impl ChannelResponder {
    /// Create a responder and the endpoint the second device talks to
    pub fn new() -> (Self, ResponderEndpoint) {
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
        (
            Self {
                requests: request_tx,
                replies: reply_rx,
            },
            ResponderEndpoint {
                requests: request_rx,
                replies: reply_tx,
            },
        )
    }
}

impl ChallengeResponder for ChannelResponder {
    fn challenge(
        &self,
        request: &TwoFactorRequest,
        timeout: Duration,
    ) -> Result<String, TwoFactorAbort> {
        self.requests
            .send(request.clone())
            .map_err(|_| TwoFactorAbort::Disconnected)?;
        debug!(id = %request.id, "2FA request sent");

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok(reply) if reply.id == request.id => return Ok(reply.payload),
                Ok(reply) => warn!(id = %reply.id, "Dropping 2FA reply for another request"),
                Err(RecvTimeoutError::Timeout) => return Err(TwoFactorAbort::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(TwoFactorAbort::Disconnected),
            }
        }
    }
}
