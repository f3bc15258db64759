//! Guest memory and allocators reached through a Wasmtime caller.
//!
//! `CallerHeap` holds the memory *handle*, not its bytes. Each read and write
//! re-resolves the byte slice from the store, so a `memory.grow` performed by
//! the module's allocator mid-encode is always observed.

use std::future::Future;

use jsni_core::AbiConfig;
use jsni_wire::FatPtr;
use wasmtime::{Caller, Extern, Memory, TypedFunc};

use crate::error::{HostError, HostResult};
use crate::memory::{GuestAllocator, GuestMemory, checked_range};

/// Heap access for one invocation of the entry point.
pub struct CallerHeap<'c, 'a, T> {
    caller: &'c mut Caller<'a, T>,
    memory: Memory,
    alloc_export: String,
    alloc_slots_export: String,
    alloc: Option<TypedFunc<u32, u64>>,
    alloc_slots: Option<TypedFunc<u32, u64>>,
}

impl<'c, 'a, T> CallerHeap<'c, 'a, T> {
    /// Resolve the memory export named in `abi`.
    ///
    /// Allocator exports are resolved on first use, so calls that return
    /// nothing work against modules without them.
    pub fn new(caller: &'c mut Caller<'a, T>, abi: &AbiConfig) -> HostResult<Self> {
        let memory = caller
            .get_export(&abi.memory_export)
            .and_then(Extern::into_memory)
            .ok_or_else(|| HostError::MemoryNotFound(abi.memory_export.clone()))?;

        Ok(Self {
            caller,
            memory,
            alloc_export: abi.alloc_export.clone(),
            alloc_slots_export: abi.alloc_slots_export.clone(),
            alloc: None,
            alloc_slots: None,
        })
    }

    /// Access the store data.
    pub fn data(&self) -> &T {
        self.caller.data()
    }

    /// The memory handle.
    pub fn memory(&self) -> Memory {
        self.memory
    }
}

impl<'c, 'a, T: Send> CallerHeap<'c, 'a, T> {
    async fn call_allocator(&mut self, slots: bool, arg: u32) -> HostResult<FatPtr> {
        let func = if slots {
            resolve_allocator(self.caller, &self.alloc_slots_export, &mut self.alloc_slots)?
        } else {
            resolve_allocator(self.caller, &self.alloc_export, &mut self.alloc)?
        };

        let raw = func.call_async(&mut *self.caller, arg).await?;
        Ok(FatPtr::from_raw(raw))
    }
}

fn resolve_allocator<T>(
    caller: &mut Caller<'_, T>,
    name: &str,
    cached: &mut Option<TypedFunc<u32, u64>>,
) -> HostResult<TypedFunc<u32, u64>> {
    if let Some(func) = cached {
        return Ok(func.clone());
    }

    let func = caller
        .get_export(name)
        .and_then(Extern::into_func)
        .ok_or_else(|| HostError::AllocatorNotFound {
            name: name.to_string(),
            reason: "no such function export".to_string(),
        })?;

    let typed = func
        .typed::<u32, u64>(&*caller)
        .map_err(|e| HostError::AllocatorNotFound {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

    *cached = Some(typed.clone());
    Ok(typed)
}

impl<T> GuestMemory for CallerHeap<'_, '_, T> {
    fn size(&self) -> usize {
        self.memory.data_size(&*self.caller)
    }

    fn read(&self, offset: u32, len: u32) -> HostResult<&[u8]> {
        let data = self.memory.data(&*self.caller);
        let range = checked_range(offset, len as usize, data.len())?;
        Ok(&data[range])
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> HostResult<()> {
        let data = self.memory.data_mut(&mut *self.caller);
        let range = checked_range(offset, bytes.len(), data.len())?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }
}

impl<T: Send> GuestAllocator for CallerHeap<'_, '_, T> {
    fn alloc(&mut self, size: u32) -> impl Future<Output = HostResult<FatPtr>> + Send {
        self.call_allocator(false, size)
    }

    fn alloc_slots(&mut self, count: u32) -> impl Future<Output = HostResult<FatPtr>> + Send {
        self.call_allocator(true, count)
    }
}

impl<T> std::fmt::Debug for CallerHeap<'_, '_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallerHeap")
            .field("memory_size", &self.size())
            .field("alloc_export", &self.alloc_export)
            .field("alloc_slots_export", &self.alloc_slots_export)
            .finish()
    }
}
