mod extended_key;
mod status;

pub use extended_key::{ExtendedKey, UnsupportedXpubType, XpubType};
pub use status::{DeviceStatus, Version, VersionCheck, VersionMismatch};
