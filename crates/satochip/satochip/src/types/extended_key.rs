use std::fmt;
use std::str::FromStr;

use k256::ecdsa::VerifyingKey;

use crate::crypto::hash160;

/// Script type an extended public key is exported for
///
/// The script type only changes the four version bytes in front of the
/// serialized key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XpubType {
    /// Legacy P2PKH (`xpub` / `tpub`)
    Standard,
    /// P2WPKH nested in P2SH (`ypub` / `upub`)
    P2wpkhP2sh,
    /// P2WSH nested in P2SH (`Ypub` / `Upub`)
    P2wshP2sh,
    /// Native P2WPKH (`zpub` / `vpub`)
    P2wpkh,
    /// Native P2WSH (`Zpub` / `Vpub`)
    P2wsh,
}

impl XpubType {
    /// All types the card can export keys for
    pub const ALL: [Self; 5] = [
        Self::Standard,
        Self::P2wpkhP2sh,
        Self::P2wshP2sh,
        Self::P2wpkh,
        Self::P2wsh,
    ];

    /// SLIP-132 version bytes
    pub const fn version_bytes(self, testnet: bool) -> [u8; 4] {
        match (self, testnet) {
            (Self::Standard, false) => [0x04, 0x88, 0xB2, 0x1E],
            (Self::P2wpkhP2sh, false) => [0x04, 0x9D, 0x7C, 0xB2],
            (Self::P2wshP2sh, false) => [0x02, 0x95, 0xB4, 0x3F],
            (Self::P2wpkh, false) => [0x04, 0xB2, 0x47, 0x46],
            (Self::P2wsh, false) => [0x02, 0xAA, 0x7E, 0xD3],
            (Self::Standard, true) => [0x04, 0x35, 0x87, 0xCF],
            (Self::P2wpkhP2sh, true) => [0x04, 0x4A, 0x52, 0x62],
            (Self::P2wshP2sh, true) => [0x02, 0x42, 0x89, 0xEF],
            (Self::P2wpkh, true) => [0x04, 0x5F, 0x1C, 0xF6],
            (Self::P2wsh, true) => [0x02, 0x57, 0x54, 0x83],
        }
    }

    /// Name used in wallet files and on the command line
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::P2wpkhP2sh => "p2wpkh-p2sh",
            Self::P2wshP2sh => "p2wsh-p2sh",
            Self::P2wpkh => "p2wpkh",
            Self::P2wsh => "p2wsh",
        }
    }
}

impl fmt::Display for XpubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for XpubType {
    type Err = UnsupportedXpubType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnsupportedXpubType(s.to_string()))
    }
}

/// Script type name the card cannot export keys for
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported script type {0:?}")]
pub struct UnsupportedXpubType(pub String);

/// A BIP32 extended public key as derived by the card
///
/// Holds no private material; the card never releases it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedKey {
    /// Public key at the derived path
    pub public_key: VerifyingKey,
    /// BIP32 chain code
    pub chain_code: [u8; 32],
    /// Derivation depth
    pub depth: u8,
    /// First four bytes of the parent's hash160, zero at depth 0
    pub parent_fingerprint: [u8; 4],
    /// Last child index, zero at depth 0
    pub child_number: u32,
}

impl ExtendedKey {
    /// 33-byte compressed SEC1 public key
    pub fn public_key_bytes(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out.copy_from_slice(self.public_key.to_encoded_point(true).as_bytes());
        out
    }

    /// Fingerprint of this key, as a child would record it
    pub fn fingerprint(&self) -> [u8; 4] {
        let hash = hash160(&self.public_key_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    /// Base58check serialization with the version bytes of `xtype`
    pub fn to_xpub(&self, xtype: XpubType, testnet: bool) -> String {
        let mut data = Vec::with_capacity(78);
        data.extend_from_slice(&xtype.version_bytes(testnet));
        data.push(self.depth);
        data.extend_from_slice(&self.parent_fingerprint);
        data.extend_from_slice(&self.child_number.to_be_bytes());
        data.extend_from_slice(&self.chain_code);
        data.extend_from_slice(&self.public_key_bytes());
        bs58::encode(data).with_check().into_string()
    }
}
