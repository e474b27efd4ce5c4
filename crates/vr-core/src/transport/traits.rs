//! Bus abstraction for PMBus devices.
//!
//! Defines the `I2cBus` trait the paged transport is built on, so a
//! platform I2C driver and the in-memory mock are interchangeable.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("NACK from bus {bus} target 0x{addr:02X}")]
    Nack { bus: u8, addr: u8 },

    #[error("Timeout after {timeout_ms}ms on bus {bus}")]
    Timeout { bus: u8, timeout_ms: u64 },

    #[error("Arbitration lost on bus {bus}")]
    ArbitrationLost { bus: u8 },

    #[error("Device 0x{addr:02X} rejected register 0x{reg:02X}")]
    Rejected { addr: u8, reg: u8 },

    #[error("Short read from register 0x{reg:02X}: expected {expected} bytes, got {actual}")]
    ShortRead {
        reg: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Page {page} out of range, device has {pages} pages")]
    InvalidPage { page: u8, pages: u8 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Bus-level failures that may succeed on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Nack { .. }
                | TransportError::Timeout { .. }
                | TransportError::ArbitrationLost { .. }
        )
    }
}

/// Byte-oriented bus shared by every device on a board.
///
/// Implementations must be safe to call from several threads; per-device
/// serialization is the caller's job.
pub trait I2cBus: Send + Sync {
    /// Write `data` to the target in one transaction.
    fn write(&self, bus: u8, addr: u8, data: &[u8]) -> Result<(), TransportError>;

    /// Write `data` then read `len` bytes with a repeated start.
    fn write_read(&self, bus: u8, addr: u8, data: &[u8], len: usize)
    -> Result<Vec<u8>, TransportError>;
}
