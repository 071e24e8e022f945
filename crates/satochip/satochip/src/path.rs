//! BIP32 derivation paths and their wire encoding

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use coins_bip32::path::DerivationPath;

use crate::constants::HARDENED;

/// Errors raised while parsing a derivation path
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// A component is not a decimal index
    #[error("malformed path component {component:?} in {path:?}")]
    Malformed {
        /// The whole path as given
        path: String,
        /// The offending component
        component: String,
    },

    /// A component does not fit below the hardened offset
    #[error("path component {component:?} out of range in {path:?}")]
    OutOfRange {
        /// The whole path as given
        path: String,
        /// The offending component
        component: String,
    },

    /// The encoded path must fit a single APDU data field
    #[error("path depth {0} exceeds 63")]
    TooDeep(usize),
}

/// Deepest path whose 4-byte components fit a short APDU data field
pub const MAX_DEPTH: usize = 63;

/// An ordered list of BIP32 child indices
///
/// Indices at or above `0x8000_0000` are hardened. The depth of a path is its
/// number of components; the master key has depth 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyPath(Vec<u32>);

impl KeyPath {
    /// The master key path `m`
    pub const fn master() -> Self {
        Self(Vec::new())
    }

    /// Build a path from raw indices
    pub fn from_indices(indices: impl Into<Vec<u32>>) -> Self {
        Self(indices.into())
    }

    /// Number of derivation steps
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Raw child indices
    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    /// Last child index, `None` for the master path
    pub fn child_number(&self) -> Option<u32> {
        self.0.last().copied()
    }

    /// Path one level up, `None` for the master path
    pub fn parent(&self) -> Option<Self> {
        self.0
            .split_last()
            .map(|(_, parent)| Self(parent.to_vec()))
    }

    /// Extend the path with a normal or hardened child
    pub fn child(&self, index: u32) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    /// Card encoding: each index as a 4-byte big-endian integer
    pub fn to_bytes(&self) -> Bytes {
        self.0
            .iter()
            .fold(BytesMut::with_capacity(4 * self.0.len()), |mut bytes, index| {
                bytes.put_u32(*index);
                bytes
            })
            .freeze()
    }

    /// Depth and card encoding, the pair every derivation command needs
    pub fn encode(&self) -> Result<(u8, Bytes), PathError> {
        let depth = self.depth();
        if depth > MAX_DEPTH {
            return Err(PathError::TooDeep(depth));
        }
        Ok((depth as u8, self.to_bytes()))
    }
}

/// Split an encoded path into the encoding of its parent
///
/// Returns `None` for the master path or input that is not a whole number of
/// components.
pub fn parent_bytes(encoded: &[u8]) -> Option<&[u8]> {
    if encoded.is_empty() || encoded.len() % 4 != 0 {
        return None;
    }
    Some(&encoded[..encoded.len() - 4])
}

impl FromStr for KeyPath {
    type Err = PathError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let mut indices = Vec::new();

        for (position, component) in path.split('/').enumerate() {
            if component.is_empty() || (position == 0 && component == "m") {
                continue;
            }

            let (digits, hardened) = match component.strip_suffix(['\'', 'h', 'H']) {
                Some(digits) => (digits, true),
                None => (component, false),
            };

            let malformed = || PathError::Malformed {
                path: path.to_string(),
                component: component.to_string(),
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }

            let index: u32 = digits.parse().map_err(|_| PathError::OutOfRange {
                path: path.to_string(),
                component: component.to_string(),
            })?;
            if index >= HARDENED {
                return Err(PathError::OutOfRange {
                    path: path.to_string(),
                    component: component.to_string(),
                });
            }

            indices.push(if hardened { index + HARDENED } else { index });
        }

        Ok(Self(indices))
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for index in &self.0 {
            if *index >= HARDENED {
                write!(f, "/{}'", index - HARDENED)?;
            } else {
                write!(f, "/{index}")?;
            }
        }
        Ok(())
    }
}

impl From<&DerivationPath> for KeyPath {
    fn from(path: &DerivationPath) -> Self {
        Self(path.iter().copied().collect())
    }
}

impl From<&KeyPath> for DerivationPath {
    fn from(path: &KeyPath) -> Self {
        Self::from(path.0.clone())
    }
}
