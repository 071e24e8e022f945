//! First-use provisioning of a card
//!
//! The workflow is an explicit state machine. Each call to
//! [`Provisioner::step`] performs one transition, asking the
//! [`ProvisioningHandler`] for user input where needed:
//!
//! ```text
//! CheckStatus ─┬─ set up ──► EnterPin ─────────────────────────────┐
//!              └─ blank ──► CollectPin ◄─► ConfirmPin              │
//!                               TwoFactorChoice ► Setup ► VerifyPin ◄┘
//!                               CheckAuthentikey ─┬─► Done
//!                                                 └─► SeedChoice
//!                      CreateSeed ► ConfirmSeed ─┐
//!                      RestoreSeed ──────────────┴─► ImportSeed ► Done
//! ```

use std::fmt;

use k256::ecdsa::VerifyingKey;
use satochip_apdu_core::CardTransport;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::commands::SetupParams;
use crate::constants::TWO_FA_SECRET_LENGTH;
use crate::error::{Error, Result};
use crate::seed::{self, SeedFormat};
use crate::session::CardSession;
use crate::types::{VersionCheck, VersionMismatch};
use crate::validation::validate_pin;

/// Which PIN the handler is asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinPrompt {
    /// PIN of a card that is already set up
    Unlock,
    /// New PIN for a blank card
    New,
    /// The new PIN again
    Confirm,
}

/// Create a fresh seed or restore an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedAction {
    /// Generate a new phrase in the given format
    Create(SeedFormat),
    /// Type in an existing mnemonic
    Restore,
}

/// User interaction needed during provisioning
///
/// Methods returning `Option` use `None` for "the user cancelled", which ends
/// the workflow with [`Error::UserCancelled`].
pub trait ProvisioningHandler {
    /// Ask for a PIN
    fn request_pin(&mut self, prompt: PinPrompt) -> Option<String>;

    /// Whether to enable 2FA on the card
    fn choose_two_factor(&mut self) -> Option<bool>;

    /// Show the 2FA secret for pairing with the second device
    ///
    /// Return `true` once the secret is stored. Enabling 2FA cannot be undone
    /// without resetting the card; `false` goes back to the 2FA choice.
    fn show_two_factor_secret(&mut self, secret_hex: &str) -> bool;

    /// Choose between creating and restoring a seed
    fn choose_seed_action(&mut self) -> Option<SeedAction>;

    /// Show a freshly generated mnemonic
    fn show_mnemonic(&mut self, phrase: &str);

    /// Ask for the mnemonic shown earlier
    fn confirm_mnemonic(&mut self) -> Option<String>;

    /// Ask for the optional seed passphrase; empty for none
    fn request_passphrase(&mut self) -> Option<String>;

    /// Ask for a mnemonic to restore and its format
    fn request_seed(&mut self) -> Option<(String, SeedFormat)>;

    /// Card protocol differs from the supported one
    fn warn_version(&mut self, mismatch: &VersionMismatch);

    /// A recoverable problem; the handler is asked again afterwards
    fn show_error(&mut self, message: &str);
}

/// Provisioning states
pub enum ProvisioningState {
    /// Read the card status
    CheckStatus,
    /// Ask for the PIN of a card that is set up
    EnterPin,
    /// Ask for a new PIN
    CollectPin,
    /// Ask for the new PIN again
    ConfirmPin {
        /// PIN entered first
        pin: Zeroizing<Vec<u8>>,
    },
    /// Decide on 2FA
    TwoFactorChoice {
        /// Confirmed PIN
        pin: Zeroizing<Vec<u8>>,
    },
    /// Run SETUP
    Setup {
        /// Confirmed PIN
        pin: Zeroizing<Vec<u8>>,
        /// 2FA secret, when enabled
        two_factor: Option<Zeroizing<[u8; TWO_FA_SECRET_LENGTH]>>,
    },
    /// Verify the cached PIN
    VerifyPin,
    /// Check whether a seed is loaded
    CheckAuthentikey,
    /// Create or restore
    SeedChoice,
    /// Generate and show a mnemonic
    CreateSeed(SeedFormat),
    /// Have the user type the new mnemonic back
    ConfirmSeed {
        /// Generated mnemonic
        phrase: Zeroizing<String>,
        /// How the mnemonic becomes a seed
        format: SeedFormat,
    },
    /// Read an existing mnemonic
    RestoreSeed,
    /// Import the BIP32 seed
    ImportSeed {
        /// Seed bytes
        seed: Zeroizing<Vec<u8>>,
    },
    /// Card is ready; holds its authentikey
    Done(VerifyingKey),
}

impl ProvisioningState {
    /// State name, safe to log
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CheckStatus => "CheckStatus",
            Self::EnterPin => "EnterPin",
            Self::CollectPin => "CollectPin",
            Self::ConfirmPin { .. } => "ConfirmPin",
            Self::TwoFactorChoice { .. } => "TwoFactorChoice",
            Self::Setup { .. } => "Setup",
            Self::VerifyPin => "VerifyPin",
            Self::CheckAuthentikey => "CheckAuthentikey",
            Self::SeedChoice => "SeedChoice",
            Self::CreateSeed(_) => "CreateSeed",
            Self::ConfirmSeed { .. } => "ConfirmSeed",
            Self::RestoreSeed => "RestoreSeed",
            Self::ImportSeed { .. } => "ImportSeed",
            Self::Done(_) => "Done",
        }
    }

    /// Whether provisioning has finished
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

// Secrets stay out of logs
impl fmt::Debug for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Drives a card through provisioning
pub struct Provisioner<'a, T: CardTransport, H: ProvisioningHandler> {
    session: &'a mut CardSession<T>,
    handler: &'a mut H,
    state: ProvisioningState,
}

impl<T: CardTransport, H: ProvisioningHandler> fmt::Debug for Provisioner<'_, T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provisioner")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a, T: CardTransport, H: ProvisioningHandler> Provisioner<'a, T, H> {
    /// Start provisioning an open session
    pub const fn new(session: &'a mut CardSession<T>, handler: &'a mut H) -> Self {
        Self {
            session,
            handler,
            state: ProvisioningState::CheckStatus,
        }
    }

    /// Current state
    pub const fn state(&self) -> &ProvisioningState {
        &self.state
    }

    /// Run until the card is set up, unlocked and seeded
    pub fn run(mut self) -> Result<VerifyingKey> {
        loop {
            if let ProvisioningState::Done(authentikey) = &self.state {
                return Ok(*authentikey);
            }
            self.step()?;
        }
    }

    /// Perform one transition
    ///
    /// After an error the workflow starts over from `CheckStatus`.
    pub fn step(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, ProvisioningState::CheckStatus);
        let from = state.name();
        self.state = self.transition(state)?;
        debug!(from, to = self.state.name(), "Provisioning step");
        Ok(())
    }

    fn transition(&mut self, state: ProvisioningState) -> Result<ProvisioningState> {
        use ProvisioningState as S;

        Ok(match state {
            S::CheckStatus => match self.session.get_status()? {
                Some(status) => {
                    match status.version_check() {
                        VersionCheck::Supported => {}
                        VersionCheck::Mismatch(mismatch) => self.handler.warn_version(&mismatch),
                        VersionCheck::Unsupported(mismatch) => {
                            return Err(Error::UnsupportedVersion(mismatch));
                        }
                    }
                    if status.setup_done {
                        S::EnterPin
                    } else {
                        info!("Card reports setup not done, running setup");
                        S::CollectPin
                    }
                }
                None => {
                    info!("Card is blank, running setup");
                    S::CollectPin
                }
            },

            S::EnterPin => match self.read_pin(PinPrompt::Unlock)? {
                Some(pin) => {
                    self.session.set_pin(pin);
                    S::VerifyPin
                }
                None => S::EnterPin,
            },

            S::CollectPin => match self.read_pin(PinPrompt::New)? {
                Some(pin) => S::ConfirmPin { pin },
                None => S::CollectPin,
            },

            S::ConfirmPin { pin } => {
                let confirm = self
                    .handler
                    .request_pin(PinPrompt::Confirm)
                    .map(Zeroizing::new)
                    .ok_or(Error::UserCancelled)?;
                if confirm.as_bytes() == pin.as_slice() {
                    S::TwoFactorChoice { pin }
                } else {
                    self.handler.show_error("The PIN values do not match");
                    S::CollectPin
                }
            }

            S::TwoFactorChoice { pin } => {
                if self.handler.choose_two_factor().ok_or(Error::UserCancelled)? {
                    let secret = Zeroizing::new(rand::random::<[u8; TWO_FA_SECRET_LENGTH]>());
                    let secret_hex = Zeroizing::new(hex::encode(secret.as_ref()));
                    if self.handler.show_two_factor_secret(&secret_hex) {
                        S::Setup {
                            pin,
                            two_factor: Some(secret),
                        }
                    } else {
                        S::TwoFactorChoice { pin }
                    }
                } else {
                    S::Setup {
                        pin,
                        two_factor: None,
                    }
                }
            }

            S::Setup { pin, two_factor } => {
                let mut params = SetupParams::with_pin(&pin);
                if let Some(secret) = two_factor {
                    // Zero limit: every transaction needs the second device
                    params = params.with_two_factor(*secret, 0);
                }
                self.session.setup(&params)?;
                S::VerifyPin
            }

            S::VerifyPin => match self.session.verify_pin() {
                Ok(()) => S::CheckAuthentikey,
                Err(Error::WrongPin { remaining }) => {
                    warn!(remaining, "Wrong PIN");
                    self.handler
                        .show_error(&format!("Wrong PIN, {remaining} attempts left"));
                    S::EnterPin
                }
                Err(error) => return Err(error),
            },

            S::CheckAuthentikey => match self.session.authentikey() {
                Ok(authentikey) => S::Done(authentikey),
                Err(Error::UninitializedSeed) => {
                    info!("No seed on card");
                    S::SeedChoice
                }
                Err(error) => return Err(error),
            },

            S::SeedChoice => match self.handler.choose_seed_action() {
                Some(SeedAction::Create(format)) => S::CreateSeed(format),
                Some(SeedAction::Restore) => S::RestoreSeed,
                None => return Err(Error::UserCancelled),
            },

            S::CreateSeed(format) => {
                let phrase = seed::new_phrase(format)?;
                self.handler.show_mnemonic(&phrase);
                S::ConfirmSeed { phrase, format }
            }

            S::ConfirmSeed { phrase, format } => {
                let typed = self
                    .handler
                    .confirm_mnemonic()
                    .map(Zeroizing::new)
                    .ok_or(Error::UserCancelled)?;
                if typed.split_whitespace().eq(phrase.split_whitespace()) {
                    let passphrase = self.passphrase()?;
                    let seed = seed::derive_seed(&phrase, &passphrase, format)?;
                    S::ImportSeed { seed }
                } else {
                    self.handler.show_error("The mnemonic does not match");
                    S::ConfirmSeed { phrase, format }
                }
            }

            S::RestoreSeed => {
                let (phrase, format) = self.handler.request_seed().ok_or(Error::UserCancelled)?;
                let phrase = Zeroizing::new(phrase);
                let passphrase = self.passphrase()?;
                match seed::derive_seed(&phrase, &passphrase, format) {
                    Ok(seed) => S::ImportSeed { seed },
                    Err(error) => {
                        warn!(%error, ?format, "Rejected seed");
                        self.handler.show_error(&error.to_string());
                        S::RestoreSeed
                    }
                }
            }

            S::ImportSeed { seed } => S::Done(self.session.import_seed(&seed)?),

            done @ S::Done(_) => done,
        })
    }

    /// Ask for a PIN and validate its length; `None` after a re-prompt
    fn read_pin(&mut self, prompt: PinPrompt) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let pin = self
            .handler
            .request_pin(prompt)
            .map(Zeroizing::new)
            .ok_or(Error::UserCancelled)?;
        match validate_pin(&pin) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) => {
                self.handler.show_error(&error.to_string());
                Ok(None)
            }
        }
    }

    fn passphrase(&mut self) -> Result<Zeroizing<String>> {
        self.handler
            .request_passphrase()
            .map(Zeroizing::new)
            .ok_or(Error::UserCancelled)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use satochip_apdu_core::mock::MockTransport;

    use super::*;

    #[derive(Default)]
    struct Scripted {
        pins: VecDeque<String>,
        two_factor: bool,
        errors: Vec<String>,
        warnings: usize,
    }

    impl ProvisioningHandler for Scripted {
        fn request_pin(&mut self, _prompt: PinPrompt) -> Option<String> {
            self.pins.pop_front()
        }

        fn choose_two_factor(&mut self) -> Option<bool> {
            Some(self.two_factor)
        }

        fn show_two_factor_secret(&mut self, secret_hex: &str) -> bool {
            assert_eq!(secret_hex.len(), 40);
            true
        }

        fn choose_seed_action(&mut self) -> Option<SeedAction> {
            None
        }

        fn show_mnemonic(&mut self, _phrase: &str) {}

        fn confirm_mnemonic(&mut self) -> Option<String> {
            None
        }

        fn request_passphrase(&mut self) -> Option<String> {
            Some(String::new())
        }

        fn request_seed(&mut self) -> Option<(String, SeedFormat)> {
            None
        }

        fn warn_version(&mut self, _mismatch: &VersionMismatch) {
            self.warnings += 1;
        }

        fn show_error(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }
    }

    fn pins(values: &[&str]) -> VecDeque<String> {
        values.iter().map(|pin| pin.to_string()).collect()
    }

    fn blank_card() -> CardSession<MockTransport> {
        let mut transport = MockTransport::default();
        transport.push_response(&[], 0x9000);
        transport.push_response(&[], 0x9C04);
        CardSession::open(transport).unwrap()
    }

    #[test]
    fn test_status_without_setup_runs_setup() {
        let mut transport = MockTransport::default();
        transport.push_response(&[], 0x9000);
        transport.push_response(&[0, 12, 0, 5, 5, 1, 1, 1, 0, 0, 0, 0], 0x9000);
        let mut session = CardSession::open(transport).unwrap();
        let mut handler = Scripted::default();

        let mut provisioner = Provisioner::new(&mut session, &mut handler);
        provisioner.step().unwrap();
        assert_eq!(provisioner.state().name(), "CollectPin");
    }

    #[test]
    fn test_pin_length_reprompts() {
        let mut session = blank_card();
        let mut handler = Scripted {
            pins: pins(&["123", &"9".repeat(65), "1234"]),
            ..Default::default()
        };
        let mut provisioner = Provisioner::new(&mut session, &mut handler);

        provisioner.step().unwrap();
        assert_eq!(provisioner.state().name(), "CollectPin");
        provisioner.step().unwrap();
        assert_eq!(provisioner.state().name(), "CollectPin");
        provisioner.step().unwrap();
        assert_eq!(provisioner.state().name(), "CollectPin");
        provisioner.step().unwrap();
        assert_eq!(provisioner.state().name(), "ConfirmPin");
        assert_eq!(handler.errors.len(), 2);
    }

    #[test]
    fn test_pin_mismatch_loops_back() {
        let mut session = blank_card();
        let mut handler = Scripted {
            pins: pins(&["1234", "4321", "5678", "5678"]),
            ..Default::default()
        };
        let mut provisioner = Provisioner::new(&mut session, &mut handler);

        for _ in 0..3 {
            provisioner.step().unwrap();
        }
        assert_eq!(provisioner.state().name(), "CollectPin");
        provisioner.step().unwrap();
        provisioner.step().unwrap();
        assert_eq!(provisioner.state().name(), "TwoFactorChoice");
        assert_eq!(handler.errors, ["The PIN values do not match"]);
    }

    #[test]
    fn test_two_factor_setup_sends_option_flags() {
        let mut session = blank_card();
        let mut handler = Scripted {
            pins: pins(&["1234", "1234"]),
            two_factor: true,
            ..Default::default()
        };
        let mut provisioner = Provisioner::new(&mut session, &mut handler);
        for _ in 0..4 {
            provisioner.step().unwrap();
        }
        assert_eq!(provisioner.state().name(), "Setup");
        drop(provisioner);

        // SETUP is rejected by the empty mock; the command was still sent
        let mut provisioner = Provisioner {
            session: &mut session,
            handler: &mut handler,
            state: ProvisioningState::Setup {
                pin: Zeroizing::new(b"1234".to_vec()),
                two_factor: Some(Zeroizing::new([0x42; TWO_FA_SECRET_LENGTH])),
            },
        };
        assert!(provisioner.step().is_err());
        let setup = session.transport().commands().last().unwrap();
        assert_eq!(setup[1], 0x2A);
        let tail = &setup[setup.len() - 30..];
        assert_eq!(&tail[..2], &[0x80, 0x00]);
        assert_eq!(&tail[2..22], &[0x42; 20]);
        assert_eq!(&tail[22..], &[0u8; 8]);
    }

    #[test]
    fn test_cancelled_pin_ends_workflow() {
        let mut session = blank_card();
        let mut handler = Scripted::default();
        let result = Provisioner::new(&mut session, &mut handler).run();
        assert!(matches!(result, Err(Error::UserCancelled)));
    }

    #[test]
    fn test_unsupported_version_is_fatal() {
        let mut transport = MockTransport::default();
        transport.push_response(&[], 0x9000);
        transport.push_response(&[0, 9, 0, 1, 5, 1, 1, 1], 0x9000);
        let mut session = CardSession::open(transport).unwrap();
        let mut handler = Scripted::default();

        let result = Provisioner::new(&mut session, &mut handler).run();
        assert!(matches!(result, Err(Error::UnsupportedVersion(_))));
    }

    #[test]
    fn test_version_mismatch_warns() {
        let mut transport = MockTransport::default();
        transport.push_response(&[], 0x9000);
        transport.push_response(&[0, 11, 0, 1, 5, 1, 1, 1], 0x9000);
        let mut session = CardSession::open(transport).unwrap();
        let mut handler = Scripted::default();

        let mut provisioner = Provisioner::new(&mut session, &mut handler);
        provisioner.step().unwrap();
        assert_eq!(provisioner.state().name(), "EnterPin");
        assert_eq!(handler.warnings, 1);
    }
}
