//! Errors raised while encoding or decoding wire data.

use thiserror::Error;

/// Result alias for wire-level operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Wire-level failures.
///
/// These never describe protocol semantics (bad signatures, nonce regressions);
/// they only cover bytes that cannot be turned into an envelope or back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame length prefix exceeds the configured maximum
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Declared payload size
        size: usize,
        /// Maximum accepted size
        max: usize,
    },

    /// Buffer ended before the declared frame length
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// CBOR serialization failed
    #[error("CBOR encode failed: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed
    #[error("CBOR decode failed: {0}")]
    CborDecode(String),

    /// Hex string could not be parsed into a fixed-size value
    #[error("invalid hex for {kind}: {reason}")]
    InvalidHex {
        /// What was being parsed
        kind: &'static str,
        /// Why parsing failed
        reason: String,
    },
}
