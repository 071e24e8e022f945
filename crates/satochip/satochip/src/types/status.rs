use derive_more::Display;
use satochip_apdu_core::{ResponseError, utils::PayloadReader};

use crate::constants::{MINIMUM_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSION};

/// Version number (major.minor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[display("{}.{}", major, minor)]
pub struct Version {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
}

impl Version {
    /// Create a version
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl From<(u8, u8)> for Version {
    fn from((major, minor): (u8, u8)) -> Self {
        Self::new(major, minor)
    }
}

/// Status reported by GET STATUS on a card that has been set up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Version of the card protocol
    pub protocol_version: Version,
    /// Version of the applet build
    pub applet_version: Version,
    /// Tries left for the user PIN
    pub pin0_remaining: u8,
    /// Tries left for the user PUK
    pub puk0_remaining: u8,
    /// Tries left for the second PIN
    pub pin1_remaining: u8,
    /// Tries left for the second PUK
    pub puk1_remaining: u8,
    /// Whether transactions need a 2FA challenge-response
    pub needs_2fa: bool,
    /// Whether a BIP32 seed is loaded
    pub is_seeded: bool,
    /// Whether SETUP has completed
    pub setup_done: bool,
    /// Whether the card insists on a secure channel
    pub needs_secure_channel: bool,
}

impl TryFrom<&[u8]> for DeviceStatus {
    type Error = ResponseError;

    fn try_from(payload: &[u8]) -> Result<Self, Self::Error> {
        let mut reader = PayloadReader::new(payload);
        let protocol_version = Version::new(reader.read_u8()?, reader.read_u8()?);
        let applet_version = Version::new(reader.read_u8()?, reader.read_u8()?);
        let [pin0, puk0, pin1, puk1] = reader.read_array::<4>()?;

        // Older applets stop after the retry counters
        let mut flag = |default: bool| reader.read_u8().map_or(default, |b| b != 0);
        let needs_2fa = flag(false);
        let is_seeded = flag(true);
        let setup_done = flag(true);
        let needs_secure_channel = flag(false);

        Ok(Self {
            protocol_version,
            applet_version,
            pin0_remaining: pin0,
            puk0_remaining: puk0,
            pin1_remaining: pin1,
            puk1_remaining: puk1,
            needs_2fa,
            is_seeded,
            setup_done,
            needs_secure_channel,
        })
    }
}

impl DeviceStatus {
    /// Compare the card protocol against the version this driver targets
    pub fn version_check(&self) -> VersionCheck {
        let supported = Version::from(SUPPORTED_PROTOCOL_VERSION);
        if self.protocol_version == supported {
            VersionCheck::Supported
        } else if self.protocol_version < Version::from(MINIMUM_PROTOCOL_VERSION) {
            VersionCheck::Unsupported(VersionMismatch {
                card: self.protocol_version,
                supported,
            })
        } else {
            VersionCheck::Mismatch(VersionMismatch {
                card: self.protocol_version,
                supported,
            })
        }
    }
}

/// A card protocol version that differs from the supported one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(
    "card protocol {card} differs from supported protocol {supported}; some features may not work"
)]
pub struct VersionMismatch {
    /// Version reported by the card
    pub card: Version,
    /// Version this driver targets
    pub supported: Version,
}

/// Outcome of comparing the card protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// Exact match
    Supported,
    /// Different but usable; surfaced as a warning
    Mismatch(VersionMismatch),
    /// Too old to drive
    Unsupported(VersionMismatch),
}

impl VersionCheck {
    /// The mismatch to warn about, if any
    pub const fn warning(&self) -> Option<&VersionMismatch> {
        match self {
            Self::Supported => None,
            Self::Mismatch(m) | Self::Unsupported(m) => Some(m),
        }
    }
}
