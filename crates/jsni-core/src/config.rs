//! Configuration types for the JSNI runtime.
//!
//! Every struct has builder-style `with_*` methods and can also be loaded
//! from TOML through [`JsniConfig`]:
//!
//! ```toml
//! [engine]
//! fuel_enabled = true
//!
//! [limits]
//! max_memory_bytes = 16777216
//! timeout_ms = 5000
//!
//! [abi]
//! import_module = "env"
//! import_name = "jsni_call"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Configuration for the Wasmtime engine.
///
/// Async support is always enabled: the dispatch entry point suspends the
/// module while a host callback runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Enable fuel-based CPU limiting.
    pub fuel_enabled: bool,

    /// Maximum WASM stack size in bytes.
    ///
    /// Defaults to 1MB.
    pub max_wasm_stack: usize,

    /// Enable debug information in compiled code.
    pub debug_info: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fuel_enabled: false,
            max_wasm_stack: 1024 * 1024, // 1MB
            debug_info: false,
        }
    }
}

impl EngineConfig {
    /// Create a new engine configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable fuel-based CPU limiting.
    pub fn with_fuel(mut self, enabled: bool) -> Self {
        self.fuel_enabled = enabled;
        self
    }

    /// Set the maximum WASM stack size.
    pub fn with_max_wasm_stack(mut self, bytes: usize) -> Self {
        self.max_wasm_stack = bytes;
        self
    }

    /// Enable debug information.
    pub fn with_debug_info(mut self, enabled: bool) -> Self {
        self.debug_info = enabled;
        self
    }
}

/// Resource limits applied to each instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum linear memory in bytes.
    ///
    /// Defaults to 64MB.
    pub max_memory_bytes: usize,

    /// Maximum number of memory instances.
    pub max_memories: u32,

    /// Maximum table elements.
    pub max_table_elements: u32,

    /// Fuel given to each instance when fuel is enabled.
    pub initial_fuel: u64,

    /// Wall-clock limit for one export call, including any host callbacks
    /// it awaits. `None` waits indefinitely.
    #[serde(rename = "timeout_ms", with = "opt_duration_ms")]
    pub timeout: Option<Duration>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 64 * 1024 * 1024, // 64MB
            max_memories: 1,
            max_table_elements: 10_000,
            initial_fuel: 1_000_000_000,
            timeout: None,
        }
    }
}

impl ResourceLimits {
    /// Create resource limits with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum memory limit.
    pub fn with_max_memory(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Set the initial fuel allocation.
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.initial_fuel = fuel;
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Names that bind the host to a module's JSNI imports and exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbiConfig {
    /// Import module of the dispatch entry point.
    pub import_module: String,
    /// Import name of the dispatch entry point.
    pub import_name: String,
    /// Export name of the module's linear memory.
    pub memory_export: String,
    /// Export name of the byte allocator, `(size: i32) -> i64`.
    pub alloc_export: String,
    /// Export name of the slot allocator, `(count: i32) -> i64`.
    pub alloc_slots_export: String,
}

impl Default for AbiConfig {
    fn default() -> Self {
        Self {
            import_module: "env".to_string(),
            import_name: "jsni_call".to_string(),
            memory_export: "memory".to_string(),
            alloc_export: "alloc".to_string(),
            alloc_slots_export: "alloc_jsni_value".to_string(),
        }
    }
}

impl AbiConfig {
    /// Create the default ABI names.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the import the module uses for the entry point.
    pub fn with_import(mut self, module: impl Into<String>, name: impl Into<String>) -> Self {
        self.import_module = module.into();
        self.import_name = name.into();
        self
    }

    /// Set the memory export name.
    pub fn with_memory_export(mut self, name: impl Into<String>) -> Self {
        self.memory_export = name.into();
        self
    }

    /// Set the allocator export names.
    pub fn with_allocators(mut self, bytes: impl Into<String>, slots: impl Into<String>) -> Self {
        self.alloc_export = bytes.into();
        self.alloc_slots_export = slots.into();
        self
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsniConfig {
    /// Engine settings.
    pub engine: EngineConfig,
    /// Per-instance limits.
    pub limits: ResourceLimits,
    /// Import and export names.
    pub abi: AbiConfig,
}

impl JsniConfig {
    /// Parse a configuration from TOML text. Missing fields take defaults.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

/// Serde adapter storing an optional duration as whole milliseconds.
mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
