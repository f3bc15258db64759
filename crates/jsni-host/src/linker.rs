//! Linker wrapper that installs the dispatch entry point.
//!
//! `JsniLinker` wraps Wasmtime's `Linker`, tracks every import it defines,
//! and refuses to define the same import twice.

use std::sync::Arc;

use tracing::{debug, info};
use wasmtime::{Caller, Engine, Linker};

use crate::caller::CallerHeap;
use crate::dispatch::Dispatcher;
use crate::error::{HostError, HostResult};

/// An import defined through a [`JsniLinker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredImport {
    /// The import module name.
    pub module: String,
    /// The function name.
    pub name: String,
    /// Whether this is the dispatch entry point.
    pub entry_point: bool,
}

/// A wrapper around Wasmtime's `Linker` that knows about the entry point.
pub struct JsniLinker<T> {
    inner: Linker<T>,
    registered: Vec<RegisteredImport>,
}

impl<T> JsniLinker<T> {
    /// Create a new linker for the given engine.
    pub fn new(engine: &Engine) -> Self {
        Self {
            inner: Linker::new(engine),
            registered: Vec::new(),
        }
    }

    /// Get a reference to the underlying Wasmtime linker.
    pub fn inner(&self) -> &Linker<T> {
        &self.inner
    }

    /// Get a mutable reference to the underlying Wasmtime linker.
    pub fn inner_mut(&mut self) -> &mut Linker<T> {
        &mut self.inner
    }

    /// Consume this linker and return the underlying Wasmtime linker.
    pub fn into_inner(self) -> Linker<T> {
        self.inner
    }

    /// Imports defined so far.
    pub fn registered_imports(&self) -> &[RegisteredImport] {
        &self.registered
    }

    /// Check if an import is already defined.
    pub fn is_registered(&self, module: &str, name: &str) -> bool {
        self.registered
            .iter()
            .any(|f| f.module == module && f.name == name)
    }

    /// Whether the dispatch entry point has been installed.
    pub fn has_entry_point(&self) -> bool {
        self.registered.iter().any(|f| f.entry_point)
    }

    /// Define an additional synchronous host import.
    pub fn func_wrap<Params, Results>(
        &mut self,
        module: &str,
        name: &str,
        func: impl wasmtime::IntoFunc<T, Params, Results>,
    ) -> HostResult<&mut Self> {
        self.ensure_unregistered(module, name)?;

        self.inner
            .func_wrap(module, name, func)
            .map_err(|e| registration_failed(module, name, e))?;

        self.record(module, name, false);
        Ok(self)
    }

    fn ensure_unregistered(&self, module: &str, name: &str) -> HostResult<()> {
        if self.is_registered(module, name) {
            return Err(HostError::AlreadyRegistered {
                module: module.to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn record(&mut self, module: &str, name: &str, entry_point: bool) {
        self.registered.push(RegisteredImport {
            module: module.to_string(),
            name: name.to_string(),
            entry_point,
        });
        debug!(module, name, entry_point, "Registered host import");
    }
}

impl<T: Send + 'static> JsniLinker<T> {
    /// Install `dispatcher` as the async `(i32, i32, i32) -> i32` import named
    /// by its ABI configuration.
    ///
    /// Errors from a call become traps; the embedder can recover the
    /// [`HostError`] by downcasting the Wasmtime error.
    pub fn install_dispatcher(&mut self, dispatcher: Arc<Dispatcher>) -> HostResult<&mut Self> {
        let module = dispatcher.abi().import_module.clone();
        let name = dispatcher.abi().import_name.clone();
        self.ensure_unregistered(&module, &name)?;

        self.inner
            .func_wrap_async(
                &module,
                &name,
                move |mut caller: Caller<'_, T>, (name_ptr, args_ptr, args_count): (u32, u32, u32)| {
                    let dispatcher = Arc::clone(&dispatcher);
                    Box::new(async move {
                        service(&mut caller, &dispatcher, name_ptr, args_ptr, args_count)
                            .await
                            .map_err(wasmtime::Error::new)
                    })
                },
            )
            .map_err(|e| registration_failed(&module, &name, e))?;

        self.record(&module, &name, true);
        info!(module = %module, name = %name, "Installed JSNI entry point");
        Ok(self)
    }
}

async fn service<T: Send>(
    caller: &mut Caller<'_, T>,
    dispatcher: &Dispatcher,
    name_ptr: u32,
    args_ptr: u32,
    args_count: u32,
) -> HostResult<i32> {
    let mut heap = CallerHeap::new(caller, dispatcher.abi())?;
    dispatcher
        .dispatch(&mut heap, name_ptr, args_ptr, args_count)
        .await
}

fn registration_failed(module: &str, name: &str, err: wasmtime::Error) -> HostError {
    HostError::RegistrationFailed {
        module: module.to_string(),
        name: name.to_string(),
        reason: err.to_string(),
    }
}

impl<T> std::fmt::Debug for JsniLinker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsniLinker")
            .field("registered_imports", &self.registered.len())
            .finish()
    }
}

impl Dispatcher {
    /// Install this dispatcher into `linker`.
    pub fn install<T: Send + 'static>(self: &Arc<Self>, linker: &mut JsniLinker<T>) -> HostResult<()> {
        linker.install_dispatcher(Arc::clone(self))?;
        Ok(())
    }
}
