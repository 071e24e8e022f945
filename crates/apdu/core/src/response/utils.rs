//! Utility functions for APDU response handling

use tracing::debug;

use crate::response::error::ResponseError;
use crate::response::status::StatusWord;

/// Extract status word (SW1, SW2) and payload from raw APDU response data
///
/// # Errors
/// Returns an error if the data is too short to contain a valid status word.
pub fn extract_response_parts(data: &[u8]) -> Result<((u8, u8), &[u8]), ResponseError> {
    if data.len() < 2 {
        debug!("Response too short: {} bytes", data.len());
        return Err(ResponseError::Incomplete);
    }

    let len = data.len();
    Ok(((data[len - 2], data[len - 1]), &data[..len - 2]))
}

/// Extract status word as a StatusWord object and payload from raw APDU response data
pub fn extract_status_and_payload(data: &[u8]) -> Result<(StatusWord, &[u8]), ResponseError> {
    let ((sw1, sw2), payload) = extract_response_parts(data)?;
    Ok((StatusWord::new(sw1, sw2), payload))
}

/// Bounds-checked cursor over a response payload
///
/// Applets commonly return several fields each prefixed with a big-endian
/// 16-bit length; the cursor walks such payloads without panicking on short
/// input and remembers how far it got so callers can sign-check prefixes.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> PayloadReader<'a> {
    /// Start reading at the beginning of `data`
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes consumed so far
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Bytes left to read
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Everything consumed so far
    pub fn consumed(&self) -> &'a [u8] {
        &self.data[..self.position]
    }

    /// Read exactly `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ResponseError> {
        if self.remaining() < len {
            return Err(ResponseError::Truncated {
                needed: self.position + len,
                available: self.data.len(),
            });
        }
        let out = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(out)
    }

    /// Read a fixed size array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ResponseError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8, ResponseError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a big-endian u16
    pub fn read_u16(&mut self) -> Result<u16, ResponseError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    /// Read a field prefixed by its big-endian u16 length
    pub fn read_prefixed(&mut self) -> Result<&'a [u8], ResponseError> {
        let len = self.read_u16()? as usize;
        self.read_bytes(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_response_parts() {
        let data = [0x01, 0x02, 0x03, 0x90, 0x00];
        let result = extract_response_parts(&data).unwrap();
        assert_eq!(result.0, (0x90, 0x00));
        assert_eq!(result.1, &[0x01, 0x02, 0x03]);

        let data = [0x9C, 0x04];
        let (status, payload) = extract_status_and_payload(&data).unwrap();
        assert_eq!(status, StatusWord::new(0x9C, 0x04));
        assert!(payload.is_empty());

        assert!(extract_response_parts(&[0x90]).is_err());
    }

    #[test]
    fn test_payload_reader_prefixed_fields() {
        let data = [0x00, 0x02, 0xAA, 0xBB, 0x00, 0x01, 0xCC, 0xFF];
        let mut reader = PayloadReader::new(&data);
        assert_eq!(reader.read_prefixed().unwrap(), &[0xAA, 0xBB]);
        assert_eq!(reader.consumed(), &data[..4]);
        assert_eq!(reader.read_prefixed().unwrap(), &[0xCC]);
        assert_eq!(reader.remaining(), 1);
        assert_eq!(reader.read_u8().unwrap(), 0xFF);
    }

    #[test]
    fn test_payload_reader_truncated() {
        let data = [0x00, 0x05, 0xAA];
        let mut reader = PayloadReader::new(&data);
        assert_eq!(
            reader.read_prefixed(),
            Err(ResponseError::Truncated {
                needed: 7,
                available: 3
            })
        );
    }
}
