//! Error types for PC/SC transport

use satochip_apdu_core::TransportError;

/// PC/SC-specific errors
#[derive(Debug, thiserror::Error)]
pub enum PcscError {
    /// PC/SC error
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// No readers available
    #[error("No readers available")]
    NoReadersAvailable,

    /// Reader not found
    #[error("Reader not found: {0}")]
    ReaderNotFound(String),

    /// No card present in reader
    #[error("No card present in reader: {0}")]
    NoCard(String),

    /// Card was reset
    #[error("Card was reset")]
    CardReset,

    /// Card was removed
    #[error("Card was removed")]
    CardRemoved,
}

impl From<PcscError> for TransportError {
    fn from(error: PcscError) -> Self {
        match error {
            PcscError::NoReadersAvailable | PcscError::ReaderNotFound(_) | PcscError::NoCard(_) => {
                Self::Connection
            }
            PcscError::CardReset | PcscError::CardRemoved => Self::CardRemoved,
            PcscError::Pcsc(pcsc::Error::Timeout) => Self::Timeout,
            PcscError::Pcsc(pcsc::Error::Cancelled) => Self::Cancelled,
            PcscError::Pcsc(pcsc::Error::InsufficientBuffer) => Self::BufferTooSmall,
            PcscError::Pcsc(pcsc::Error::ResetCard | pcsc::Error::RemovedCard) => {
                Self::CardRemoved
            }
            PcscError::Pcsc(pcsc::Error::NoSmartcard | pcsc::Error::UnknownReader) => {
                Self::Connection
            }
            PcscError::Pcsc(e) => Self::Driver(e as i32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_mapping() {
        assert_eq!(
            TransportError::from(PcscError::NoCard("reader".into())),
            TransportError::Connection
        );
        assert_eq!(
            TransportError::from(PcscError::Pcsc(pcsc::Error::RemovedCard)),
            TransportError::CardRemoved
        );
        assert_eq!(
            TransportError::from(PcscError::Pcsc(pcsc::Error::Timeout)),
            TransportError::Timeout
        );
    }
}
