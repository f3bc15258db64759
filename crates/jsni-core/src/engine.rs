//! Wasmtime engine wrapper.
//!
//! This module provides the `JsniEngine` type, which configures Wasmtime for
//! modules that call into the host through the async dispatch entry point.

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// Smallest stack Wasmtime accepts for running async host calls.
const MIN_WASM_STACK: usize = 64 * 1024;

/// The engine shared by every module and instance of a runtime.
///
/// # Example
///
/// ```
/// use jsni_core::{EngineConfig, JsniEngine};
///
/// let engine = JsniEngine::new(EngineConfig::default()).unwrap();
/// assert!(!engine.fuel_enabled());
/// ```
pub struct JsniEngine {
    /// The underlying Wasmtime engine.
    inner: Engine,
    /// Configuration used to create this engine.
    config: EngineConfig,
}

impl JsniEngine {
    /// Create a new engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack size is too small or Wasmtime rejects
    /// the configuration.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        if config.max_wasm_stack < MIN_WASM_STACK {
            return Err(EngineError::InvalidConfig(format!(
                "max_wasm_stack must be at least {MIN_WASM_STACK} bytes, got {}",
                config.max_wasm_stack
            )));
        }

        let mut wasmtime_config = Config::new();

        // The dispatch import is an async host function.
        wasmtime_config.async_support(true);

        wasmtime_config.consume_fuel(config.fuel_enabled);
        wasmtime_config.max_wasm_stack(config.max_wasm_stack);
        wasmtime_config.debug_info(config.debug_info);

        wasmtime_config.wasm_bulk_memory(true);
        wasmtime_config.wasm_multi_value(true);

        let inner = Engine::new(&wasmtime_config)?;

        info!(
            fuel = config.fuel_enabled,
            max_wasm_stack = config.max_wasm_stack,
            "Created JSNI engine"
        );

        Ok(Self { inner, config })
    }

    /// Create a new engine with default configuration.
    pub fn default_engine() -> EngineResult<Self> {
        Self::new(EngineConfig::default())
    }

    /// Get a reference to the underlying Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.inner
    }

    /// Get the configuration used to create this engine.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check if fuel-based limiting is enabled.
    pub fn fuel_enabled(&self) -> bool {
        self.config.fuel_enabled
    }
}

impl std::fmt::Debug for JsniEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsniEngine")
            .field("config", &self.config)
            .finish()
    }
}

/// A shared reference to an engine.
pub type SharedEngine = Arc<JsniEngine>;

/// Extension trait for creating shared engines.
pub trait IntoShared {
    /// Convert into a shared engine reference.
    fn into_shared(self) -> SharedEngine;
}

impl IntoShared for JsniEngine {
    fn into_shared(self) -> SharedEngine {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_creation() {
        let engine = JsniEngine::new(EngineConfig::default()).unwrap();
        assert!(!engine.fuel_enabled());
    }

    #[test]
    fn test_engine_with_fuel() {
        let engine = JsniEngine::new(EngineConfig::new().with_fuel(true)).unwrap();
        assert!(engine.fuel_enabled());
    }

    #[test]
    fn test_engine_rejects_tiny_stack() {
        let result = JsniEngine::new(EngineConfig::new().with_max_wasm_stack(1024));
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_shared_engine() {
        let engine = JsniEngine::default_engine().unwrap().into_shared();
        let other = Arc::clone(&engine);
        assert_eq!(engine.config(), other.config());
    }
}
