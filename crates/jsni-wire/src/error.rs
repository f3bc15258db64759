//! Error types for the wire format.

use thiserror::Error;

use crate::kind::ValueKind;

/// Errors produced while reading or building wire values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// A slot carried a tag outside the value kind enumeration.
    #[error("Unknown value tag: {0}")]
    UnknownTag(u8),

    /// String payload bytes were not valid UTF-8.
    #[error("Invalid UTF-8 in string payload: {0}")]
    InvalidUtf8(String),

    /// A region kind (string or bytes) was used where a scalar was expected.
    #[error("Value kind {0} has no inline scalar payload")]
    NotScalar(ValueKind),

    /// A value cannot be represented by any value kind.
    #[error("Value cannot be encoded: {0}")]
    Unencodable(String),

    /// A slot or region lies outside the memory being read.
    #[error("Access out of bounds: offset={offset}, len={len}, size={size}")]
    OutOfBounds {
        /// Start of the access.
        offset: u64,
        /// Bytes requested.
        len: u64,
        /// Size of the memory.
        size: u64,
    },

    /// A returned handle does not name a recorded slot array.
    #[error("Unknown slot array handle: {0}")]
    UnknownHandle(u32),
}

/// Result type for wire operations.
pub type WireResult<T> = std::result::Result<T, WireError>;
