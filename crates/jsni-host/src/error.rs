//! Error types for decoding, encoding and dispatch.

use jsni_wire::WireError;
use thiserror::Error;

/// Errors raised while servicing a call from the module.
#[derive(Debug, Error)]
pub enum HostError {
    /// A slot could not be decoded or a value could not be built.
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// No callback is registered under the requested name.
    #[error("Unresolved function: {0}")]
    UnresolvedFunction(String),

    /// A callback returned a value the wire format cannot carry.
    #[error("Result {index} cannot be encoded: {reason}")]
    UnencodableValue {
        /// Position of the value in the result list.
        index: usize,
        /// Why encoding failed.
        reason: String,
    },

    /// A callback reported failure.
    #[error("Function '{function}' failed: {message}")]
    CallbackFailed {
        /// The function name.
        function: String,
        /// The callback's error message.
        message: String,
    },

    /// The module does not export its memory under the configured name.
    #[error("Memory export '{0}' not found")]
    MemoryNotFound(String),

    /// Memory access out of bounds.
    #[error("Memory access out of bounds: offset={offset}, len={len}, memory_size={memory_size}")]
    MemoryAccessOutOfBounds {
        /// The offset attempted.
        offset: usize,
        /// The length attempted.
        len: usize,
        /// The actual memory size.
        memory_size: usize,
    },

    /// An allocator export is missing or has the wrong signature.
    #[error("Allocator export '{name}' unavailable: {reason}")]
    AllocatorNotFound {
        /// The export name.
        name: String,
        /// The reason it could not be used.
        reason: String,
    },

    /// The module's allocator returned an unusable region.
    #[error("Allocation of {requested} bytes failed: {reason}")]
    AllocationFailed {
        /// Bytes requested.
        requested: u64,
        /// The reason for failure.
        reason: String,
    },

    /// Entry point registration failed.
    #[error("Failed to register function '{module}::{name}': {reason}")]
    RegistrationFailed {
        /// The module name.
        module: String,
        /// The function name.
        name: String,
        /// The reason for failure.
        reason: String,
    },

    /// Entry point already registered.
    #[error("Function already registered: {module}::{name}")]
    AlreadyRegistered {
        /// The module name.
        module: String,
        /// The function name.
        name: String,
    },

    /// Underlying Wasmtime error.
    #[error("Wasmtime error: {0}")]
    Wasmtime(#[from] wasmtime::Error),
}

impl HostError {
    pub(crate) fn out_of_bounds(offset: u32, len: usize, memory_size: usize) -> Self {
        HostError::MemoryAccessOutOfBounds {
            offset: offset as usize,
            len,
            memory_size,
        }
    }
}

/// Result type for host operations.
pub type HostResult<T> = std::result::Result<T, HostError>;
