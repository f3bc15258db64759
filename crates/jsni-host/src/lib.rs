//! JSNI Host
//!
//! This crate services calls a WebAssembly module makes to named host
//! functions:
//!
//! - [`FunctionRegistry`]: name to [`HostFunction`] map shared by `Arc`
//! - [`decode_args`] / [`decode_name`]: read tagged slots out of linear memory
//! - [`encode_results`]: write results back through the module's allocators
//! - [`Dispatcher`]: the `jsni_call` entry point tying the above together
//! - [`JsniLinker`]: installs the entry point as an async Wasmtime import
//!
//! Memory access goes through the [`GuestMemory`] and [`GuestAllocator`]
//! traits. [`CallerHeap`] implements them over a live Wasmtime caller;
//! [`BufferHeap`] over a plain buffer.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use jsni_host::{BufferHeap, Dispatcher, FunctionRegistry, JsniValue, decode_args};
//!
//! # let rt = tokio::runtime::Runtime::new().unwrap();
//! # rt.block_on(async {
//! let registry = Arc::new(FunctionRegistry::new());
//! registry.register_sync("add", |args| {
//!     let sum = args.iter().filter_map(JsniValue::as_i64).sum();
//!     Ok(vec![JsniValue::I64(sum)])
//! });
//! let dispatcher = Dispatcher::new(registry);
//!
//! let mut heap = BufferHeap::default();
//! let name = heap.place_name("add").unwrap();
//! let args = heap
//!     .place_slots(&[
//!         JsniValue::I32(5).to_scalar_slot().unwrap(),
//!         JsniValue::I32(7).to_scalar_slot().unwrap(),
//!     ])
//!     .unwrap();
//!
//! let handle = dispatcher.dispatch(&mut heap, name, args, 2).await.unwrap();
//! let results = decode_args(&heap, handle as u32, 1).unwrap();
//! assert_eq!(results, vec![JsniValue::I64(12)]);
//! # });
//! ```

pub mod caller;
pub mod decode;
pub mod dispatch;
pub mod encode;
pub mod error;
pub mod linker;
pub mod memory;
pub mod registry;

// Re-export main types
pub use caller::CallerHeap;
pub use decode::{DecodedArgs, decode_args, decode_args_counted, decode_name, decode_slot};
pub use dispatch::{CallSession, Dispatcher};
pub use encode::{EncodedResults, encode_results, encode_results_counted};
pub use error::{HostError, HostResult};
pub use jsni_wire::{FatPtr, JsniValue, ValueKind};
pub use linker::{JsniLinker, RegisteredImport};
pub use memory::{BufferHeap, GuestAllocator, GuestMemory};
pub use registry::{
    AsyncFunction, CallFuture, CallbackError, CallbackResult, FunctionRegistry, HostFunction,
    JsonFunction, SharedFunction, SyncFunction,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::dispatch::Dispatcher;
    pub use crate::error::{HostError, HostResult};
    pub use crate::linker::JsniLinker;
    pub use crate::registry::{CallbackError, CallbackResult, FunctionRegistry, HostFunction};
    pub use jsni_wire::JsniValue;
}
