//! JSNI Core
//!
//! This crate provides the Wasmtime plumbing underneath the JSNI host runtime:
//!
//! - [`JsniEngine`]: Wasmtime engine configured for async host calls
//! - [`ModuleLoader`]: loading modules and checking the JSNI ABI
//! - [`JsniConfig`]: engine, limit and ABI settings, loadable from TOML
//! - one error enum per stage: engine, config, module, execution
//!
//! # Example
//!
//! ```ignore
//! use jsni_core::prelude::*;
//!
//! let engine = JsniEngine::default_engine()?.into_shared();
//! let loader = ModuleLoader::new(engine.clone());
//! let module = loader.load_file(Path::new("guest.wasm"))?;
//! module.check_abi(&AbiConfig::default())?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod module;

// Re-export main types at crate root
pub use config::{AbiConfig, EngineConfig, JsniConfig, ResourceLimits};
pub use engine::{IntoShared, JsniEngine, SharedEngine};
pub use error::{ConfigError, EngineError, ExecutionError, ModuleError, TrapInfo};
pub use module::{
    ExportInfo, FunctionSignature, ImportInfo, ItemKind, ModuleLoader, ModuleMetadata,
    ValidatedModule, WasmType,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{AbiConfig, EngineConfig, JsniConfig, ResourceLimits};
    pub use crate::engine::{IntoShared, JsniEngine, SharedEngine};
    pub use crate::error::{ExecutionError, ModuleError};
    pub use crate::module::{ModuleLoader, ValidatedModule};
}
