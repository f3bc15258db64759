//! # JSNI - Named Host Calls for WebAssembly
//!
//! JSNI lets a WebAssembly module call host functions by name. The module
//! writes its arguments as tagged 16-byte slots into its own linear memory
//! and calls a single import; the host decodes them, runs the registered
//! callback (synchronous or async), and writes the results back through the
//! module's allocators.
//!
//! ## Quick Start
//!
//! ```ignore
//! use jsni::prelude::*;
//!
//! let runtime = Jsni::builder()
//!     .with_timeout(Duration::from_secs(5))
//!     .register_sync("add", |args| {
//!         let sum = args.iter().filter_map(JsniValue::as_i64).sum();
//!         Ok(vec![JsniValue::I64(sum)])
//!     })
//!     .build()?;
//!
//! let module = runtime.load_file("guest.wasm")?;
//! let mut instance = runtime.instantiate(&module).await?;
//! let total: i64 = instance.call("run", ()).await?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   Your Application                   │
//! ├──────────────────────────────────────────────────────┤
//! │                     jsni (facade)                    │
//! │                  ┌────────────────┐                  │
//! │                  │  Jsni Builder  │                  │
//! │                  └───────┬────────┘                  │
//! │  ┌────────────┬──────────┴───┬──────────────────┐    │
//! │  │ jsni-core  │  jsni-host   │  jsni-observe    │    │
//! │  │ (engine,   │  (registry,  │  (events,        │    │
//! │  │  modules)  │   dispatch)  │   metrics)       │    │
//! │  └────────────┴──────┬───────┴──────────────────┘    │
//! │                  jsni-wire (slots, tags)             │
//! ├──────────────────────────────────────────────────────┤
//! │                       Wasmtime                       │
//! └──────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use jsni_core::{
    AbiConfig, ConfigError, EngineConfig, EngineError, ExecutionError, JsniConfig, JsniEngine,
    ModuleError, ModuleLoader, ResourceLimits, SharedEngine, ValidatedModule,
};
use jsni_host::{
    CallbackError, CallbackResult, Dispatcher, FunctionRegistry, HostError, JsniLinker,
    SharedFunction,
};
use jsni_observe::{EventDispatcher, EventSubscriber, LoggingSubscriber, MetricsCollector};
use jsni_wire::JsniValue;
use tracing::info;

pub mod instance;

pub use instance::{InstanceData, InstanceId, InstanceMetrics, JsniInstance};

// Re-export from sub-crates
pub use jsni_core;
pub use jsni_host;
pub use jsni_observe;
pub use jsni_wire;

/// Main entry point for JSNI.
pub struct Jsni;

impl Jsni {
    /// Create a new runtime builder.
    pub fn builder() -> JsniBuilder {
        JsniBuilder::new()
    }

    /// Create a builder from a TOML configuration file.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<JsniBuilder, JsniError> {
        let config = JsniConfig::from_file(path.as_ref())?;
        Ok(JsniBuilder::new().with_config(config))
    }

    /// Create a runtime with default configuration and no functions.
    pub fn with_defaults() -> Result<JsniRuntime, JsniError> {
        JsniBuilder::new().build()
    }
}

/// Builder for configuring a [`JsniRuntime`].
pub struct JsniBuilder {
    config: JsniConfig,
    events: Arc<EventDispatcher>,
    registry: Arc<FunctionRegistry>,
}

impl JsniBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        let events = Arc::new(EventDispatcher::new());
        Self {
            config: JsniConfig::default(),
            registry: Arc::new(FunctionRegistry::with_events(Arc::clone(&events))),
            events,
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: JsniConfig) -> Self {
        self.config = config;
        self
    }

    // Engine configuration

    /// Enable or disable fuel metering.
    pub fn with_fuel(mut self, enabled: bool) -> Self {
        self.config.engine.fuel_enabled = enabled;
        self
    }

    /// Enable or disable debug info.
    pub fn with_debug_info(mut self, enabled: bool) -> Self {
        self.config.engine.debug_info = enabled;
        self
    }

    /// Set custom engine configuration.
    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.config.engine = config;
        self
    }

    // Resource limits

    /// Set the maximum memory limit in bytes.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.config.limits.max_memory_bytes = bytes;
        self
    }

    /// Set the fuel given to each instance. Enables fuel metering.
    pub fn with_fuel_limit(mut self, fuel: u64) -> Self {
        self.config.engine.fuel_enabled = true;
        self.config.limits.initial_fuel = fuel;
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.limits.timeout = Some(timeout);
        self
    }

    /// Set custom resource limits.
    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// Set the import and export names used by modules.
    pub fn with_abi(mut self, abi: AbiConfig) -> Self {
        self.config.abi = abi;
        self
    }

    // Host functions

    /// Register a host function.
    pub fn register(self, name: impl Into<String>, function: SharedFunction) -> Self {
        self.registry.register(name, function);
        self
    }

    /// Register a synchronous closure.
    pub fn register_sync<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<JsniValue>) -> CallbackResult + Send + Sync + 'static,
    {
        self.registry.register_sync(name, f);
        self
    }

    /// Register a closure returning a future.
    pub fn register_async<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<JsniValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.registry.register_async(name, f);
        self
    }

    /// Register a closure over JSON values.
    pub fn register_json<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<serde_json::Value>) -> Result<Vec<serde_json::Value>, CallbackError>
            + Send
            + Sync
            + 'static,
    {
        self.registry.register_json(name, f);
        self
    }

    // Observability

    /// Add an event subscriber.
    pub fn with_event_subscriber(self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.events.subscribe(subscriber);
        self
    }

    /// Forward dispatch events to `tracing`.
    pub fn with_logging(self) -> Self {
        self.with_event_subscriber(Arc::new(LoggingSubscriber::new()))
    }

    /// Build the runtime.
    pub fn build(self) -> Result<JsniRuntime, JsniError> {
        let engine = Arc::new(JsniEngine::new(self.config.engine.clone())?);

        let dispatcher = Dispatcher::new(self.registry)
            .with_events(self.events)
            .with_metrics(Arc::new(MetricsCollector::new()))
            .with_abi(self.config.abi.clone());

        info!(
            functions = dispatcher.registry().len(),
            import = %format!("{}::{}", self.config.abi.import_module, self.config.abi.import_name),
            "Built JSNI runtime"
        );

        Ok(JsniRuntime {
            engine,
            default_limits: self.config.limits,
            dispatcher: Arc::new(dispatcher),
        })
    }
}

impl Default for JsniBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured runtime: one engine, one registry, one dispatcher.
pub struct JsniRuntime {
    engine: SharedEngine,
    default_limits: ResourceLimits,
    dispatcher: Arc<Dispatcher>,
}

impl JsniRuntime {
    /// Get a reference to the engine.
    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// Get the default resource limits.
    pub fn default_limits(&self) -> &ResourceLimits {
        &self.default_limits
    }

    /// The import and export names in use.
    pub fn abi(&self) -> &AbiConfig {
        self.dispatcher.abi()
    }

    /// The function registry. Functions registered here are visible to
    /// every instance, including ones already created.
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        self.dispatcher.registry()
    }

    /// Get the event dispatcher.
    pub fn events(&self) -> &Arc<EventDispatcher> {
        self.dispatcher.events()
    }

    /// Get the dispatch metrics.
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        self.dispatcher.metrics()
    }

    /// Get the dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Create a module loader.
    pub fn loader(&self) -> ModuleLoader {
        ModuleLoader::new(Arc::clone(&self.engine))
    }

    /// Load a module from bytes.
    pub fn load_bytes(&self, bytes: &[u8]) -> Result<ValidatedModule, JsniError> {
        Ok(self.loader().load_bytes(bytes)?)
    }

    /// Load a module from a file.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ValidatedModule, JsniError> {
        Ok(self.loader().load_file(path.as_ref())?)
    }

    /// Load a module from WAT text format.
    pub fn load_wat(&self, wat: &str) -> Result<ValidatedModule, JsniError> {
        Ok(self.loader().load_wat(wat)?)
    }

    /// Instantiate a module with the default limits.
    pub async fn instantiate(&self, module: &ValidatedModule) -> Result<JsniInstance, JsniError> {
        self.instantiate_with(module, (), self.default_limits.clone())
            .await
    }

    /// Instantiate a module with custom state and limits.
    ///
    /// Modules that import the entry point are checked against the ABI first.
    pub async fn instantiate_with<S: Send + 'static>(
        &self,
        module: &ValidatedModule,
        state: S,
        limits: ResourceLimits,
    ) -> Result<JsniInstance<S>, JsniError> {
        let abi = self.dispatcher.abi();
        if module.uses_dispatch(abi) {
            module.check_abi(abi)?;
        }

        let mut linker = JsniLinker::new(self.engine.inner());
        self.dispatcher.install(&mut linker)?;

        JsniInstance::instantiate(
            Arc::clone(&self.engine),
            &linker,
            module,
            limits,
            abi.memory_export.clone(),
            state,
        )
        .await
    }
}

impl std::fmt::Debug for JsniRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsniRuntime")
            .field("default_limits", &self.default_limits)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// Errors from the JSNI runtime.
#[derive(Debug, thiserror::Error)]
pub enum JsniError {
    /// Engine error.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Module error.
    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    /// Execution error.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// A host call made by the module failed.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] HostError),
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Main types
    pub use crate::{Jsni, JsniBuilder, JsniError, JsniInstance, JsniRuntime};

    // Core types
    pub use jsni_core::{AbiConfig, EngineConfig, JsniConfig, ResourceLimits, ValidatedModule};

    // Host types
    pub use jsni_host::{CallbackError, CallbackResult, FunctionRegistry, HostError, HostFunction};

    // Wire types
    pub use jsni_wire::{FatPtr, JsniValue, Slot, ValueKind};

    // Observability types
    pub use jsni_observe::{
        CollectingSubscriber, DispatchEvent, EventDispatcher, EventSubscriber, MetricsCollector,
        MetricsSnapshot,
    };

    // Common std types
    pub use std::sync::Arc;
    pub use std::time::Duration;
}
