//! Error types for engine setup, configuration, module loading and export
//! calls.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Engine construction failed.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The [`EngineConfig`](crate::EngineConfig) was rejected before reaching Wasmtime.
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Wasmtime refused the configuration.
    #[error("Wasmtime error: {0}")]
    Wasmtime(#[from] wasmtime::Error),
}

/// Errors reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// The path that was read.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// The TOML was malformed or had unexpected fields.
    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A module could not be loaded, or does not speak JSNI.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The text format did not parse.
    #[error("Invalid WASM module: {0}")]
    Invalid(String),

    /// The module file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The module does not follow the JSNI calling convention.
    #[error("JSNI ABI mismatch: {0}")]
    AbiMismatch(String),

    /// Compilation failed.
    #[error("Compilation failed: {0}")]
    Wasmtime(#[from] wasmtime::Error),
}

/// A call into a module export did not complete.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The module trapped.
    #[error("WASM trap: {0}")]
    Trap(#[from] TrapInfo),

    /// The call, host callbacks included, outlived its timeout.
    #[error("Execution timeout after {0:?}")]
    Timeout(Duration),

    /// The instance burned through its fuel.
    #[error("Out of fuel: limit was {limit}")]
    OutOfFuel {
        /// Fuel the instance started with.
        limit: u64,
    },

    /// No export with that name and signature.
    #[error("Function not found: '{0}'")]
    FunctionNotFound(String),

    /// Any other Wasmtime failure.
    #[error("Wasmtime error: {0}")]
    Wasmtime(#[from] wasmtime::Error),
}

/// A trap, detached from the Wasmtime error that carried it.
#[derive(Debug, Clone)]
pub struct TrapInfo {
    /// Debug name of the trap code, e.g. `MemoryOutOfBounds`.
    pub code: Option<String>,
    /// Wasmtime's description.
    pub message: String,
}

impl std::fmt::Display for TrapInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {code}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for TrapInfo {}

impl From<wasmtime::Trap> for TrapInfo {
    fn from(trap: wasmtime::Trap) -> Self {
        Self {
            code: Some(format!("{trap:?}")),
            message: trap.to_string(),
        }
    }
}

/// Result with [`EngineError`].
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result with [`ConfigError`].
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result with [`ModuleError`].
pub type ModuleResult<T> = std::result::Result<T, ModuleError>;

/// Result with [`ExecutionError`].
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;
