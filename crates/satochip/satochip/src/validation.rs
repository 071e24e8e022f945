//! Input validation for values typed by the user

use satochip_apdu_core::MAX_DATA_LENGTH;
use tracing::warn;
use zeroize::Zeroizing;

use crate::constants::{PIN_MAX_LENGTH, PIN_MIN_LENGTH};

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The input was shorter or longer than allowed
    #[error("Input length {actual} is out of range {min}..={max}")]
    LengthOutOfRange {
        /// Length of the input in characters
        actual: usize,
        /// Minimum allowed length
        min: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// The input is too large to send to the card
    #[error("Input is {actual} bytes, at most {max} fit in one command")]
    TooManyBytes {
        /// Length of the input in UTF-8 bytes
        actual: usize,
        /// Maximum allowed byte length
        max: usize,
    },

    /// Two entries that must match did not
    #[error("Entries do not match")]
    Mismatch,
}

/// Validates a PIN and returns its UTF-8 bytes
///
/// A PIN is any text between 4 and 64 characters long, both inclusive, whose
/// UTF-8 encoding fits one command.
pub fn validate_pin(pin: &str) -> Result<Zeroizing<Vec<u8>>, ValidationError> {
    let actual = pin.chars().count();
    if !(PIN_MIN_LENGTH..=PIN_MAX_LENGTH).contains(&actual) {
        warn!(length = actual, "Rejected PIN with invalid length");
        return Err(ValidationError::LengthOutOfRange {
            actual,
            min: PIN_MIN_LENGTH,
            max: PIN_MAX_LENGTH,
        });
    }

    if pin.len() > MAX_DATA_LENGTH {
        warn!(bytes = pin.len(), "Rejected PIN with too many bytes");
        return Err(ValidationError::TooManyBytes {
            actual: pin.len(),
            max: MAX_DATA_LENGTH,
        });
    }

    Ok(Zeroizing::new(pin.as_bytes().to_vec()))
}
