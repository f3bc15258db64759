//! Instantiated modules.
//!
//! A `JsniInstance` owns one Wasmtime store and one module instance linked
//! against a dispatcher. Calls into the module are async because the entry
//! point suspends the module while a host callback runs.

use std::ops::Range;
use std::time::{Duration, Instant};

use jsni_core::{ExecutionError, ResourceLimits, SharedEngine, TrapInfo, ValidatedModule};
use jsni_host::{HostError, JsniLinker};
use tracing::{debug, info, warn};
use uuid::Uuid;
use wasmtime::{Extern, Instance, Memory, Store, StoreLimits, StoreLimitsBuilder, Trap};

use crate::JsniError;

/// Unique identifier for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Create a new random instance ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Data stored in the Wasmtime store.
pub struct InstanceData<S = ()> {
    /// Unique identifier for this instance.
    pub id: InstanceId,
    /// User-provided state.
    pub user_state: S,
    limits: StoreLimits,
}

/// Statistics about calls made into the module.
#[derive(Debug, Clone, Default)]
pub struct InstanceMetrics {
    /// Export calls made.
    pub calls: u64,
    /// Fuel consumed across all calls.
    pub fuel_consumed: u64,
    /// Duration of the most recent call.
    pub last_call_duration: Option<Duration>,
}

/// A module instantiated against a dispatcher.
pub struct JsniInstance<S = ()> {
    engine: SharedEngine,
    store: Store<InstanceData<S>>,
    instance: Instance,
    module: ValidatedModule,
    limits: ResourceLimits,
    memory_export: String,
    metrics: InstanceMetrics,
}

impl<S: Send + 'static> JsniInstance<S> {
    pub(crate) async fn instantiate(
        engine: SharedEngine,
        linker: &JsniLinker<InstanceData<S>>,
        module: &ValidatedModule,
        limits: ResourceLimits,
        memory_export: String,
        user_state: S,
    ) -> Result<Self, JsniError> {
        let id = InstanceId::new();

        let store_limits = StoreLimitsBuilder::new()
            .memory_size(limits.max_memory_bytes)
            .table_elements(limits.max_table_elements as usize)
            .instances(1)
            .tables(10)
            .memories(limits.max_memories as usize)
            .build();

        let data = InstanceData {
            id,
            user_state,
            limits: store_limits,
        };

        let mut store = Store::new(engine.inner(), data);
        store.limiter(|data| &mut data.limits);

        if engine.fuel_enabled() {
            store
                .set_fuel(limits.initial_fuel)
                .map_err(ExecutionError::from)?;
        }

        let instance = linker
            .inner()
            .instantiate_async(&mut store, module.inner())
            .await
            .map_err(|err| map_call_error(err, limits.initial_fuel))?;

        info!(
            instance_id = %id,
            module_name = ?module.name(),
            "Module instantiated"
        );

        Ok(Self {
            engine,
            store,
            instance,
            module: module.clone(),
            limits,
            memory_export,
            metrics: InstanceMetrics::default(),
        })
    }

    /// Get the instance ID.
    pub fn id(&self) -> InstanceId {
        self.store.data().id
    }

    /// The module this instance was created from.
    pub fn module(&self) -> &ValidatedModule {
        &self.module
    }

    /// Access the user state.
    pub fn state(&self) -> &S {
        &self.store.data().user_state
    }

    /// Access the user state mutably.
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.store.data_mut().user_state
    }

    /// Call statistics.
    pub fn metrics(&self) -> &InstanceMetrics {
        &self.metrics
    }

    /// The limits this instance runs under.
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Call an exported function.
    ///
    /// Any host call the export makes is serviced by the dispatcher. If a
    /// timeout is configured it covers the whole export call, callbacks
    /// included.
    ///
    /// # Errors
    ///
    /// A failed host call surfaces as [`JsniError::Dispatch`]; traps, fuel
    /// exhaustion and timeouts as [`JsniError::Execution`].
    pub async fn call<P, R>(&mut self, name: &str, params: P) -> Result<R, JsniError>
    where
        P: wasmtime::WasmParams + Sync,
        R: wasmtime::WasmResults + Sync,
    {
        let func = self
            .instance
            .get_typed_func::<P, R>(&mut self.store, name)
            .map_err(|_| ExecutionError::FunctionNotFound(name.to_string()))?;

        let id = self.id();
        let initial_fuel = self.remaining_fuel().unwrap_or(0);
        let started = Instant::now();

        debug!(instance_id = %id, function = name, "Calling function");

        let result = match self.limits.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, func.call_async(&mut self.store, params)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(instance_id = %id, function = name, "Execution timeout");
                        return Err(ExecutionError::Timeout(limit).into());
                    }
                }
            }
            None => func.call_async(&mut self.store, params).await,
        };

        let duration = started.elapsed();
        self.metrics.calls += 1;
        self.metrics.last_call_duration = Some(duration);
        if let Some(remaining) = self.remaining_fuel() {
            self.metrics.fuel_consumed += initial_fuel.saturating_sub(remaining);
        }

        match result {
            Ok(value) => {
                info!(
                    instance_id = %id,
                    function = name,
                    duration = ?duration,
                    "Function call completed successfully"
                );
                Ok(value)
            }
            Err(err) => {
                let err = map_call_error(err, self.limits.initial_fuel);
                warn!(instance_id = %id, function = name, error = %err, "Function call failed");
                Err(err)
            }
        }
    }

    /// Call an exported function with no arguments and no return value.
    pub async fn call_void(&mut self, name: &str) -> Result<(), JsniError> {
        self.call::<(), ()>(name, ()).await
    }

    fn memory(&mut self) -> Result<Memory, JsniError> {
        self.instance
            .get_export(&mut self.store, &self.memory_export)
            .and_then(Extern::into_memory)
            .ok_or_else(|| HostError::MemoryNotFound(self.memory_export.clone()).into())
    }

    /// Copy bytes out of the module's memory.
    pub fn read_memory(&mut self, offset: u32, len: u32) -> Result<Vec<u8>, JsniError> {
        let memory = self.memory()?;
        let data = memory.data(&self.store);
        let range = memory_range(offset, len as usize, data.len())?;
        Ok(data[range].to_vec())
    }

    /// Copy bytes into the module's memory at `offset`.
    ///
    /// Used to stage data the module reads on its next call; the memory is
    /// not grown.
    pub fn write_memory(&mut self, offset: u32, bytes: &[u8]) -> Result<(), JsniError> {
        let memory = self.memory()?;
        let data = memory.data_mut(&mut self.store);
        let range = memory_range(offset, bytes.len(), data.len())?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Current size of the module's memory in bytes.
    pub fn memory_size(&mut self) -> Result<usize, JsniError> {
        let memory = self.memory()?;
        Ok(memory.data_size(&self.store))
    }

    /// Get the remaining fuel.
    pub fn remaining_fuel(&self) -> Option<u64> {
        if self.engine.fuel_enabled() {
            self.store.get_fuel().ok()
        } else {
            None
        }
    }

    /// Add more fuel to the instance.
    pub fn add_fuel(&mut self, fuel: u64) -> Result<(), JsniError> {
        if self.engine.fuel_enabled() {
            let current = self.store.get_fuel().map_err(ExecutionError::from)?;
            self.store
                .set_fuel(current.saturating_add(fuel))
                .map_err(ExecutionError::from)?;
            debug!(instance_id = %self.id(), added = fuel, "Added fuel");
        }
        Ok(())
    }
}

/// Recover the most specific error from a failed Wasmtime call.
fn memory_range(offset: u32, len: usize, size: usize) -> Result<Range<usize>, JsniError> {
    let start = offset as usize;
    match start.checked_add(len) {
        Some(end) if end <= size => Ok(start..end),
        _ => Err(HostError::MemoryAccessOutOfBounds {
            offset: start,
            len,
            memory_size: size,
        }
        .into()),
    }
}

fn map_call_error(err: wasmtime::Error, fuel_limit: u64) -> JsniError {
    let err = match err.downcast::<HostError>() {
        Ok(host) => return JsniError::Dispatch(host),
        Err(err) => err,
    };

    match err.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => ExecutionError::OutOfFuel { limit: fuel_limit }.into(),
        Some(trap) => ExecutionError::Trap(TrapInfo::from(*trap)).into(),
        None => ExecutionError::Wasmtime(err).into(),
    }
}

impl<S> std::fmt::Debug for JsniInstance<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsniInstance")
            .field("id", &self.store.data().id)
            .field("module", &self.module.name())
            .field("metrics", &self.metrics)
            .finish()
    }
}
