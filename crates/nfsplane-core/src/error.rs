//! Error types for the core codecs

use thiserror::Error;

/// Failures of the file handle codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandleError {
    /// File id payload is longer than the protocol version allows
    #[error("file id too large: {len} bytes (max {max})")]
    OversizeFid {
        /// Supplied file id length
        len: usize,
        /// Maximum file id length for the protocol version
        max: usize,
    },
    /// Header and buffer disagree, or the buffer is truncated
    #[error("malformed file handle: {reason}")]
    MalformedHandle {
        /// What was wrong with the buffer
        reason: String,
    },
    /// Format version tag is not one this codec understands
    #[error("unsupported file handle version: 0x{0:08X}")]
    UnsupportedVersion(u32),
}

/// Failures decoding fixed-layout wire records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Buffer ended before the record did
    #[error("truncated data: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the decoder needed
        needed: usize,
        /// Bytes left in the buffer
        available: usize,
    },
    /// Field holds a value outside its domain
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
    /// Record version not understood
    #[error("unsupported record version {got} (expected {expected})")]
    VersionMismatch {
        /// Version this build understands
        expected: u32,
        /// Version found on the wire
        got: u32,
    },
}

/// Result type alias for handle codec operations.
pub type Result<T> = std::result::Result<T, HandleError>;
