//! Crate error type and the sensor-framework status mapping.

use std::fmt;

use thiserror::Error;

use crate::chip::ChipFamily;
use crate::config::ConfigError;
use crate::firmware::ImageError;
use crate::peci::PeciError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum VrError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Identity mismatch: {field} expected 0x{expected:X}, read 0x{actual:X}")]
    IdentityMismatch {
        field: &'static str,
        expected: u32,
        actual: u32,
    },

    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("Rail {rail} busy: lock not acquired within {timeout_ms}ms")]
    LockTimeout { rail: String, timeout_ms: u64 },

    #[error("{family} does not support {operation}")]
    Unsupported {
        family: ChipFamily,
        operation: &'static str,
    },

    #[error("Unsupported encoding in register 0x{register:02X}: 0x{value:04X}")]
    UnsupportedEncoding { register: u8, value: u16 },

    #[error("{what} out of range: {value}")]
    OutOfRange { what: &'static str, value: u32 },

    #[error("Rail {0} not found")]
    RailNotFound(usize),

    #[error("Rail {0} is not adjustable")]
    NotAdjustable(String),

    #[error("No default voltage captured for rail {0}")]
    NoDefault(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("PECI error: {0}")]
    Peci(#[from] PeciError),
}

/// Coarse classification used by callers deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bus NACK or timeout that survived the transport's retries.
    Transport,
    /// The device explicitly rejected the request.
    Protocol,
    /// Identity check failed before a destructive operation.
    Precondition,
    /// Malformed firmware image.
    Parse,
    /// Device busy, retry on the next cycle.
    LockTimeout,
    Unsupported,
    InvalidRequest,
    Config,
}

impl VrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VrError::Transport(TransportError::Rejected { .. }) => ErrorKind::Protocol,
            VrError::Transport(_) => ErrorKind::Transport,
            VrError::IdentityMismatch { .. } => ErrorKind::Precondition,
            VrError::Image(_) => ErrorKind::Parse,
            VrError::LockTimeout { .. } => ErrorKind::LockTimeout,
            VrError::Unsupported { .. } | VrError::UnsupportedEncoding { .. } => {
                ErrorKind::Unsupported
            }
            VrError::OutOfRange { .. }
            | VrError::RailNotFound(_)
            | VrError::NotAdjustable(_)
            | VrError::NoDefault(_) => ErrorKind::InvalidRequest,
            VrError::Config(_) => ErrorKind::Config,
            VrError::Peci(PeciError::IllegalRequest { .. }) => ErrorKind::Protocol,
            VrError::Peci(PeciError::Unsupported { .. }) => ErrorKind::Unsupported,
            VrError::Peci(_) => ErrorKind::Transport,
        }
    }

    /// Whether the same call may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            VrError::LockTimeout { .. } => true,
            VrError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result codes consumed by the external sensor framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorStatus {
    Success,
    NotFound,
    AccessFailure,
    InitFailure,
    UnspecifiedError,
}

impl SensorStatus {
    pub fn from_result<T>(result: &Result<T, VrError>) -> Self {
        match result {
            Ok(_) => SensorStatus::Success,
            Err(e) => e.into(),
        }
    }
}

impl From<&VrError> for SensorStatus {
    fn from(err: &VrError) -> Self {
        match err {
            VrError::RailNotFound(_) | VrError::Peci(PeciError::Unsupported { .. }) => {
                SensorStatus::NotFound
            }
            VrError::Transport(_)
            | VrError::LockTimeout { .. }
            | VrError::UnsupportedEncoding { .. }
            | VrError::IdentityMismatch { .. }
            | VrError::Peci(_) => SensorStatus::AccessFailure,
            VrError::Config(_) | VrError::NoDefault(_) => SensorStatus::InitFailure,
            _ => SensorStatus::UnspecifiedError,
        }
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorStatus::Success => write!(f, "SUCCESS"),
            SensorStatus::NotFound => write!(f, "NOT_FOUND"),
            SensorStatus::AccessFailure => write!(f, "FAIL_TO_ACCESS"),
            SensorStatus::InitFailure => write!(f, "INIT_FAILURE"),
            SensorStatus::UnspecifiedError => write!(f, "UNSPECIFIED_ERROR"),
        }
    }
}
