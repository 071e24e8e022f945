//! Protocol constants for the Satochip applet

use satochip_apdu_core::StatusWord;

/// Applet identifier used by SELECT
pub const SATOCHIP_AID: &[u8] = b"SatoChip";

/// Class byte for all applet commands
pub const CLA_SATOCHIP: u8 = 0xB0;
/// Class byte for ISO commands (SELECT)
pub const CLA_ISO: u8 = 0x00;

/// Instruction bytes
pub mod ins {
    /// SELECT (ISO)
    pub const SELECT: u8 = 0xA4;
    /// Card setup
    pub const SETUP: u8 = 0x2A;
    /// Get applet status
    pub const GET_STATUS: u8 = 0x3C;
    /// PIN verification
    pub const VERIFY_PIN: u8 = 0x42;
    /// Import a BIP32 seed
    pub const BIP32_IMPORT_SEED: u8 = 0x6C;
    /// Derive and export an extended public key
    pub const BIP32_GET_EXTENDED_KEY: u8 = 0x6D;
    /// Sign a message with a BIP32 key
    pub const SIGN_MESSAGE: u8 = 0x6E;
    /// Sign a previously parsed transaction hash
    pub const SIGN_TRANSACTION: u8 = 0x6F;
    /// Parse a transaction preimage
    pub const PARSE_TRANSACTION: u8 = 0x71;
    /// Get the card authentication key
    pub const BIP32_GET_AUTHENTIKEY: u8 = 0x73;
    /// Encrypt or decrypt a 2FA message
    pub const CRYPT_TRANSACTION_2FA: u8 = 0x76;
}

/// Status words returned by the applet
pub mod sw {
    use super::StatusWord;

    /// Success
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);
    /// Applet not installed
    pub const FILE_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x82);
    /// No memory left; for BIP32 derivation this means the key cache is full
    pub const NO_MEMORY_LEFT: StatusWord = StatusWord::new(0x9C, 0x01);
    /// Operation not allowed in the current state
    pub const OPERATION_NOT_ALLOWED: StatusWord = StatusWord::new(0x9C, 0x03);
    /// Card setup not done yet
    pub const SETUP_NOT_DONE: StatusWord = StatusWord::new(0x9C, 0x04);
    /// PIN must be verified first
    pub const UNAUTHORIZED: StatusWord = StatusWord::new(0x9C, 0x06);
    /// Card setup already done
    pub const SETUP_ALREADY_DONE: StatusWord = StatusWord::new(0x9C, 0x07);
    /// Signature or challenge-response rejected
    pub const SIGNATURE_INVALID: StatusWord = StatusWord::new(0x9C, 0x0B);
    /// PIN blocked
    pub const IDENTITY_BLOCKED: StatusWord = StatusWord::new(0x9C, 0x0C);
    /// BIP32 derivation failed
    pub const BIP32_DERIVATION_ERROR: StatusWord = StatusWord::new(0x9C, 0x0E);
    /// Invalid parameter
    pub const INVALID_PARAMETER: StatusWord = StatusWord::new(0x9C, 0x0F);
    /// Unexpected P1
    pub const INCORRECT_P1: StatusWord = StatusWord::new(0x9C, 0x10);
    /// Unexpected P2
    pub const INCORRECT_P2: StatusWord = StatusWord::new(0x9C, 0x11);
    /// Chunked operation out of order
    pub const SEQUENCE_END: StatusWord = StatusWord::new(0x9C, 0x12);
    /// No seed imported
    pub const BIP32_UNINITIALIZED_SEED: StatusWord = StatusWord::new(0x9C, 0x14);
    /// Hash to sign does not match the last parsed transaction
    pub const INCORRECT_TXHASH: StatusWord = StatusWord::new(0x9C, 0x15);
    /// A seed is already imported
    pub const BIP32_INITIALIZED_SEED: StatusWord = StatusWord::new(0x9C, 0x17);
    /// 2FA is not enabled on this card
    pub const TWO_FA_UNINITIALIZED_KEY: StatusWord = StatusWord::new(0x9C, 0x19);
    /// Internal applet error
    pub const INTERNAL_ERROR: StatusWord = StatusWord::new(0x9C, 0xFF);
}

/// Phases of a chunked operation (sign message, parse transaction, 2FA crypt)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkPhase {
    /// Announce the operation
    Init = 0x01,
    /// Intermediate chunk
    Process = 0x02,
    /// Last chunk; the result is returned
    Finalize = 0x03,
}

/// Largest chunk sent in a single chunked APDU
pub const CHUNK_SIZE: usize = 128;

/// Key slot selecting the BIP32 key most recently derived
pub const KEY_NUMBER_BIP32: u8 = 0xFF;

/// Protocol version this driver was written against (major, minor)
pub const SUPPORTED_PROTOCOL_VERSION: (u8, u8) = (0, 12);
/// Oldest protocol version that still speaks the commands used here
pub const MINIMUM_PROTOCOL_VERSION: (u8, u8) = (0, 10);

/// Shortest PIN accepted by the provisioning workflow
pub const PIN_MIN_LENGTH: usize = 4;
/// Longest PIN accepted by the provisioning workflow
pub const PIN_MAX_LENGTH: usize = 64;

/// Option flag enabling 2FA in the SETUP command
pub const OPTION_FLAG_2FA: u16 = 0x8000;
/// 2FA shared secret length
pub const TWO_FA_SECRET_LENGTH: usize = 20;
/// Length of a 2FA challenge-response
pub const CHALLENGE_RESPONSE_LENGTH: usize = 20;
/// Challenge-response the second device returns to refuse a transaction
pub const REJECTED_CHALLENGE_RESPONSE: &str = "0000000000000000000000000000000000000000";

/// Coin type used in the 2FA payload (Litecoin)
pub const DEFAULT_COIN_TYPE: u32 = 2;
/// Account path derivations are rooted at
pub const DEFAULT_ACCOUNT_PATH: &str = "m/44'/2'/0'";

/// Hardened derivation flag
pub const HARDENED: u32 = 0x8000_0000;
