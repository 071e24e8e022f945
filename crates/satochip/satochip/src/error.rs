use satochip_apdu_core::{CommandError, Error as ApduError, ResponseError};

use crate::commands::{
    Crypt2faError, GetAuthentikeyError, GetExtendedKeyError, GetStatusError, ImportSeedError,
    ParseTransactionError, SelectError, SetupError, SignMessageError, SignTransactionError,
    VerifyPinError,
};
use crate::path::PathError;
use crate::seed::SeedError;
use crate::two_factor::TwoFactorAbort;
use crate::types::{UnsupportedXpubType, VersionMismatch};
use crate::validation::ValidationError;

/// Result type for Satochip operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classes of failure callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The link to the card failed or the session is unusable
    Transport,
    /// The card answered with an unexpected status or malformed data
    Protocol,
    /// A signature or hash returned by the card did not verify
    Integrity,
    /// The card has no seed yet
    UninitializedSeed,
    /// A derivation path could not be parsed
    MalformedPath,
    /// The second factor refused, timed out or answered for another transaction
    TwoFactorAbort,
    /// Bad input or a cancelled prompt on the caller side
    Usage,
}

/// Checks on data returned by the card
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    /// Neither point parity verifies the card self-signature
    #[error("no public key matches the card self-signature")]
    SelfSignature,

    /// The authentikey signature over a response does not verify
    #[error("response is not signed by the card authentikey")]
    AuthentikeySignature,

    /// The card reported a different authentikey than the one cached
    #[error("card authentikey changed during the session")]
    AuthentikeyChanged,

    /// The card hashed a different preimage than the one sent
    #[error("transaction hash mismatch: expected {expected}, card reported {reported}")]
    HashMismatch {
        /// Locally computed double SHA-256
        expected: String,
        /// Hash returned by the card
        reported: String,
    },

    /// The derived key is not the one the wallet expects for this input
    #[error("derived key {derived} does not match wallet key {expected}")]
    KeyMismatch {
        /// Key the wallet recorded
        expected: String,
        /// Key the card derived
        derived: String,
    },

    /// The card signature is not DER or does not verify against the derived key
    #[error("card signature does not verify against the derived key")]
    Signature,
}

/// Satochip driver error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport, framing or command encoding failure
    #[error(transparent)]
    Apdu(#[from] ApduError),

    /// A previous failure invalidated the session
    #[error("Card session is invalid; reconnect the card")]
    SessionInvalid,

    /// The session has been closed
    #[error("Card session is closed")]
    SessionClosed,

    /// Data from the card failed verification
    #[error("Integrity check failed: {0}")]
    Integrity(#[from] IntegrityError),

    /// No seed on the card
    #[error("Card seed is not initialized")]
    UninitializedSeed,

    /// Invalid derivation path
    #[error(transparent)]
    MalformedPath(#[from] PathError),

    /// 2FA round trip aborted
    #[error("2FA aborted: {0}")]
    TwoFactorAborted(#[from] TwoFactorAbort),

    /// Seed phrase problem
    #[error(transparent)]
    Seed(#[from] SeedError),

    /// User input rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An operation needs the PIN and none was supplied
    #[error("PIN required")]
    PinRequired,

    /// Wrong PIN
    #[error("Wrong PIN, {remaining} attempts left")]
    WrongPin {
        /// Attempts left before the PIN blocks
        remaining: u8,
    },

    /// PIN blocked
    #[error("PIN is blocked")]
    PinBlocked,

    /// SETUP has not been run
    #[error("Card setup not done")]
    SetupNotDone,

    /// SETUP was already run
    #[error("Card setup already done")]
    AlreadySetup,

    /// A seed is already loaded
    #[error("Card already holds a seed")]
    AlreadySeeded,

    /// Applet protocol too old to drive
    #[error("Unsupported card: {0}")]
    UnsupportedVersion(VersionMismatch),

    /// Coinbase inputs have nothing to sign
    #[error("Input {0} is a coinbase input")]
    CoinbaseInput(usize),

    /// No candidate key with a known derivation
    #[error("No key with a known derivation for input {0}")]
    NoMatchingKey(usize),

    /// The user cancelled a prompt
    #[error("Cancelled by user")]
    UserCancelled,

    /// Unknown script type for xpub export
    #[error(transparent)]
    UnsupportedXpubType(#[from] UnsupportedXpubType),

    /// A command failed with a status word this driver does not map
    #[error("{command} failed with status {sw1:02X}{sw2:02X}")]
    Status {
        /// Command name
        command: &'static str,
        /// SW1
        sw1: u8,
        /// SW2
        sw2: u8,
    },

    /// The card refused a command for a known reason
    #[error("{command} rejected: {reason}")]
    Rejected {
        /// Command name
        command: &'static str,
        /// Rejection reason
        reason: String,
    },
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Apdu(e) if e.is_transport() => ErrorKind::Transport,
            Self::SessionInvalid | Self::SessionClosed => ErrorKind::Transport,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::UninitializedSeed => ErrorKind::UninitializedSeed,
            Self::MalformedPath(_) => ErrorKind::MalformedPath,
            Self::TwoFactorAborted(_) => ErrorKind::TwoFactorAbort,
            Self::Seed(_)
            | Self::Validation(_)
            | Self::PinRequired
            | Self::CoinbaseInput(_)
            | Self::NoMatchingKey(_)
            | Self::UserCancelled
            | Self::UnsupportedXpubType(_) => ErrorKind::Usage,
            Self::Apdu(_)
            | Self::WrongPin { .. }
            | Self::PinBlocked
            | Self::SetupNotDone
            | Self::AlreadySetup
            | Self::AlreadySeeded
            | Self::UnsupportedVersion(_)
            | Self::Status { .. }
            | Self::Rejected { .. } => ErrorKind::Protocol,
        }
    }

    /// Whether the session must be dropped after this error
    pub fn invalidates_session(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    fn rejected(command: &'static str, reason: impl ToString) -> Self {
        Self::Rejected {
            command,
            reason: reason.to_string(),
        }
    }
}

impl From<ResponseError> for Error {
    fn from(error: ResponseError) -> Self {
        Self::Apdu(error.into())
    }
}

impl From<CommandError> for Error {
    fn from(error: CommandError) -> Self {
        Self::Apdu(error.into())
    }
}

impl From<SelectError> for Error {
    fn from(error: SelectError) -> Self {
        match error {
            SelectError::Apdu(e) => Self::Apdu(e),
            SelectError::NotFound => Self::rejected("SELECT", "Satochip applet not found"),
            SelectError::Unknown { sw1, sw2 } => Self::Status {
                command: "SELECT",
                sw1,
                sw2,
            },
        }
    }
}

impl From<GetStatusError> for Error {
    fn from(error: GetStatusError) -> Self {
        match error {
            GetStatusError::Apdu(e) => Self::Apdu(e),
            GetStatusError::Unknown { sw1, sw2 } => Self::Status {
                command: "GET STATUS",
                sw1,
                sw2,
            },
        }
    }
}

impl From<SetupError> for Error {
    fn from(error: SetupError) -> Self {
        match error {
            SetupError::Apdu(e) => Self::Apdu(e),
            SetupError::AlreadyDone => Self::AlreadySetup,
            e @ SetupError::InvalidParameter => Self::rejected("SETUP", e),
            SetupError::Unknown { sw1, sw2 } => Self::Status {
                command: "SETUP",
                sw1,
                sw2,
            },
        }
    }
}

impl From<VerifyPinError> for Error {
    fn from(error: VerifyPinError) -> Self {
        match error {
            VerifyPinError::Apdu(e) => Self::Apdu(e),
            VerifyPinError::WrongPin { remaining } => Self::WrongPin { remaining },
            VerifyPinError::Blocked => Self::PinBlocked,
            VerifyPinError::SetupNotDone => Self::SetupNotDone,
            VerifyPinError::Unknown { sw1, sw2 } => Self::Status {
                command: "VERIFY PIN",
                sw1,
                sw2,
            },
        }
    }
}

impl From<ImportSeedError> for Error {
    fn from(error: ImportSeedError) -> Self {
        match error {
            ImportSeedError::Apdu(e) => Self::Apdu(e),
            ImportSeedError::AlreadySeeded => Self::AlreadySeeded,
            ImportSeedError::Unauthorized => Self::PinRequired,
            ImportSeedError::Unknown { sw1, sw2 } => Self::Status {
                command: "IMPORT SEED",
                sw1,
                sw2,
            },
        }
    }
}

impl From<GetAuthentikeyError> for Error {
    fn from(error: GetAuthentikeyError) -> Self {
        match error {
            GetAuthentikeyError::Apdu(e) => Self::Apdu(e),
            GetAuthentikeyError::UninitializedSeed => Self::UninitializedSeed,
            GetAuthentikeyError::Unknown { sw1, sw2 } => Self::Status {
                command: "GET AUTHENTIKEY",
                sw1,
                sw2,
            },
        }
    }
}

impl From<GetExtendedKeyError> for Error {
    fn from(error: GetExtendedKeyError) -> Self {
        match error {
            GetExtendedKeyError::Apdu(e) => Self::Apdu(e),
            GetExtendedKeyError::Unauthorized => Self::PinRequired,
            GetExtendedKeyError::UninitializedSeed => Self::UninitializedSeed,
            e @ (GetExtendedKeyError::CacheFull | GetExtendedKeyError::DerivationFailed) => {
                Self::rejected("GET EXTENDED KEY", e)
            }
            GetExtendedKeyError::Unknown { sw1, sw2 } => Self::Status {
                command: "GET EXTENDED KEY",
                sw1,
                sw2,
            },
        }
    }
}

impl From<ParseTransactionError> for Error {
    fn from(error: ParseTransactionError) -> Self {
        match error {
            ParseTransactionError::Apdu(e) => Self::Apdu(e),
            ParseTransactionError::Unauthorized => Self::PinRequired,
            e @ (ParseTransactionError::InvalidPreimage | ParseTransactionError::OutOfSequence) => {
                Self::rejected("PARSE TRANSACTION", e)
            }
            ParseTransactionError::Unknown { sw1, sw2 } => Self::Status {
                command: "PARSE TRANSACTION",
                sw1,
                sw2,
            },
        }
    }
}

impl From<SignTransactionError> for Error {
    fn from(error: SignTransactionError) -> Self {
        match error {
            SignTransactionError::Apdu(e) => Self::Apdu(e),
            SignTransactionError::Unauthorized => Self::PinRequired,
            SignTransactionError::ChallengeResponseRejected => {
                Self::TwoFactorAborted(TwoFactorAbort::CardRejected)
            }
            e @ SignTransactionError::IncorrectHash => Self::rejected("SIGN TRANSACTION", e),
            SignTransactionError::Unknown { sw1, sw2 } => Self::Status {
                command: "SIGN TRANSACTION",
                sw1,
                sw2,
            },
        }
    }
}

impl From<SignMessageError> for Error {
    fn from(error: SignMessageError) -> Self {
        match error {
            SignMessageError::Apdu(e) => Self::Apdu(e),
            SignMessageError::Unauthorized => Self::PinRequired,
            e @ SignMessageError::OutOfSequence => Self::rejected("SIGN MESSAGE", e),
            SignMessageError::Unknown { sw1, sw2 } => Self::Status {
                command: "SIGN MESSAGE",
                sw1,
                sw2,
            },
        }
    }
}

impl From<Crypt2faError> for Error {
    fn from(error: Crypt2faError) -> Self {
        match error {
            Crypt2faError::Apdu(e) => Self::Apdu(e),
            e @ (Crypt2faError::TwoFactorUninitialized | Crypt2faError::OutOfSequence) => {
                Self::rejected("CRYPT 2FA", e)
            }
            Crypt2faError::Unknown { sw1, sw2 } => Self::Status {
                command: "CRYPT 2FA",
                sw1,
                sw2,
            },
        }
    }
}
