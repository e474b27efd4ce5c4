//! PECI sideband bus abstraction and RdPkgConfig response decoding.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::protocol::constants::peci;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeciError {
    #[error("PECI bus error: {0}")]
    Bus(String),

    #[error("Illegal request for index 0x{index:02X}")]
    IllegalRequest { index: u8 },

    #[error("Hardware, firmware or associated logic error for index 0x{index:02X} (cc 0x{code:02X})")]
    HardwareError { index: u8, code: u8 },

    #[error("Short response for index 0x{index:02X}: expected {expected} bytes, got {actual}")]
    ShortResponse {
        index: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Raw sideband access to CPU packages.
pub trait PeciBus: Send + Sync {
    /// Issue RdPkgConfig and return the response, completion code first.
    fn rd_pkg_config(&self, addr: u8, index: u8, param: u16, len: usize) -> Result<Vec<u8>, PeciError>;
}

/// First byte of every RdPkgConfig response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCode {
    Success,
    IllegalRequest,
    Other(u8),
}

impl From<u8> for CompletionCode {
    fn from(code: u8) -> Self {
        match code {
            peci::CC_SUCCESS => CompletionCode::Success,
            peci::CC_ILLEGAL_REQUEST => CompletionCode::IllegalRequest,
            other => CompletionCode::Other(other),
        }
    }
}

/// A successful 4-byte RdPkgConfig response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PkgConfigResponse {
    data: u32,
}

impl PkgConfigResponse {
    /// Validate length and completion code, then extract the data word.
    pub fn decode(index: u8, bytes: &[u8]) -> Result<Self, PeciError> {
        if bytes.len() < peci::RESPONSE_LEN {
            return Err(PeciError::ShortResponse {
                index,
                expected: peci::RESPONSE_LEN,
                actual: bytes.len(),
            });
        }
        match CompletionCode::from(bytes[0]) {
            CompletionCode::Success => Ok(Self {
                data: LittleEndian::read_u32(&bytes[1..5]),
            }),
            CompletionCode::IllegalRequest => Err(PeciError::IllegalRequest { index }),
            CompletionCode::Other(code) => Err(PeciError::HardwareError { index, code }),
        }
    }

    pub fn data(&self) -> u32 {
        self.data
    }

    /// Response byte `n`, counting the completion code as byte 0.
    pub fn byte(&self, n: usize) -> u8 {
        debug_assert!((1..=4).contains(&n));
        (self.data >> (8 * (n - 1))) as u8
    }

    /// Signed 16-bit value from bytes 1 and 2.
    pub fn low_i16(&self) -> i16 {
        self.data as u16 as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_success() {
        let r = PkgConfigResponse::decode(3, &[0x40, 0x78, 0x56, 0x34, 0x12]).unwrap();
        assert_eq!(r.data(), 0x1234_5678);
        assert_eq!(r.byte(1), 0x78);
        assert_eq!(r.byte(3), 0x34);
        assert_eq!(r.low_i16(), 0x5678);
    }

    #[test]
    fn test_decode_completion_codes() {
        assert_eq!(
            PkgConfigResponse::decode(3, &[0x90, 0, 0, 0, 0]),
            Err(PeciError::IllegalRequest { index: 3 })
        );
        assert_eq!(
            PkgConfigResponse::decode(3, &[0x80, 0, 0, 0, 0]),
            Err(PeciError::HardwareError { index: 3, code: 0x80 })
        );
    }

    #[test]
    fn test_decode_checks_length_first() {
        assert_eq!(
            PkgConfigResponse::decode(0x10, &[0x40, 0x00, 0x64]),
            Err(PeciError::ShortResponse {
                index: 0x10,
                expected: 5,
                actual: 3
            })
        );
        assert!(PkgConfigResponse::decode(0x10, &[]).is_err());
    }
}
