//! Driver for the Satochip hardware wallet applet
//!
//! [`CardSession`] owns a transport and speaks the applet's command set,
//! verifying every response the card signs with its authentikey. On top of it
//! sit the [`Keystore`], which signs transactions and messages (including the
//! 2FA round trip), and the [`Provisioner`], which takes a blank card through
//! setup and seed import.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]

pub mod commands;
pub mod constants;
pub mod crypto;
mod error;
mod keystore;
pub mod parser;
mod path;
pub mod provisioning;
pub mod seed;
mod session;
pub mod transaction;
pub mod two_factor;
mod types;
mod validation;

pub use error::{Error, ErrorKind, IntegrityError, Result};
pub use keystore::{
    DEFAULT_TWO_FACTOR_TIMEOUT, Keystore, KeystoreConfig, SignatureRequest, SigningStage,
};
pub use path::{KeyPath, PathError, parent_bytes};
pub use provisioning::{
    PinPrompt, ProvisioningHandler, ProvisioningState, Provisioner, SeedAction,
};
pub use seed::{SeedError, SeedFormat};
pub use session::{CardSession, SessionState, SetupState};
pub use transaction::{CandidateKey, InputType, OutPoint, Transaction, TxInput, TxOutput};
pub use two_factor::{
    ChallengeResponder, ChannelResponder, ResponderEndpoint, TwoFactorAbort, TwoFactorReply,
    TwoFactorRequest,
};
pub use types::{
    DeviceStatus, ExtendedKey, UnsupportedXpubType, Version, VersionCheck, VersionMismatch,
    XpubType,
};
pub use validation::{ValidationError, validate_pin};
