//! Error types for the MTP session engine.

use crate::codes::ResponseCode;
use mtp_transport::TransportError;
use thiserror::Error;

/// Session engine errors
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure (timeout, disconnect, stall, abort)
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed or unexpected data from the device
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The device answered with a non-success response code
    #[error("device error: {0}")]
    Device(ResponseCode),

    /// Path resolution failed at `segment`
    #[error("path not found: {segment:?} in {prefix:?}")]
    PathNotFound {
        /// Portion of the path resolved successfully
        prefix: String,
        /// Segment that matched no child
        segment: String,
    },

    /// Operation not allowed in the current session state
    #[error("session is {actual}, expected {expected}")]
    SessionState {
        /// State the operation requires
        expected: &'static str,
        /// State the session is in
        actual: &'static str,
    },

    /// Local I/O error while streaming object data
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the session cannot be used any more after this error
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Disconnected))
    }

    /// Whether the error came from a cancelled transaction
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Aborted))
    }

    /// Device response code, if this is a device error
    #[must_use]
    pub fn response_code(&self) -> Option<ResponseCode> {
        match self {
            Self::Device(code) => Some(*code),
            _ => None,
        }
    }
}

/// Wire-level decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Container header is short, inconsistent or of unknown type
    #[error("malformed container: {0}")]
    MalformedContainer(&'static str),

    /// A field extends past the end of the buffer
    #[error("truncated field: need {needed} bytes, {remaining} remaining")]
    TruncatedField {
        /// Bytes the field requires
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
    },

    /// Container belongs to another transaction
    #[error("transaction id mismatch: expected {expected}, got {actual}")]
    TransactionIdMismatch {
        /// Transaction in flight
        expected: u32,
        /// Transaction id found in the container
        actual: u32,
    },

    /// Datatype code outside the supported set
    #[error("unknown datatype: 0x{0:04X}")]
    UnknownDatatype(u16),

    /// Container type not valid in the current phase
    #[error("unexpected {0} container")]
    UnexpectedContainer(&'static str),

    /// Data container carries another operation code
    #[error("unexpected code 0x{actual:04X}, expected 0x{expected:04X}")]
    UnexpectedCode {
        /// Operation in flight
        expected: u16,
        /// Code found in the container
        actual: u16,
    },

    /// String exceeds 254 UTF-16 code units
    #[error("string too long: {0} code units")]
    StringTooLong(usize),

    /// String contains U+0000, which would end it early on the wire
    #[error("string contains an embedded NUL at code unit {0}")]
    EmbeddedNul(usize),

    /// Value does not match the declared datatype
    #[error("value does not match datatype {0}")]
    DatatypeMismatch(&'static str),

    /// Integer property of a width other than 1, 2, 4 or 8 bytes
    #[error("unsupported integer width: {0} bytes")]
    UnsupportedIntegerWidth(usize),

    /// Response lacks a parameter the operation defines
    #[error("response parameter {0} missing")]
    MissingResponseParameter(usize),
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, Error>;
