//! Named host callbacks.
//!
//! The registry maps function names to [`HostFunction`]s. It is an explicit
//! object shared by `Arc` between the embedder, which registers callbacks,
//! and the dispatcher, which resolves them. Entries are only removed by
//! [`FunctionRegistry::unregister`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use jsni_observe::{DispatchEvent, EventDispatcher};
use jsni_wire::{JsniValue, WireError};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

/// What a callback produces: zero or more results, or a failure.
pub type CallbackResult = Result<Vec<JsniValue>, CallbackError>;

/// The future a callback returns. Synchronous callbacks return a ready one.
pub type CallFuture = Pin<Box<dyn Future<Output = CallbackResult> + Send + 'static>>;

/// Failure reported by a callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    /// The callback failed.
    #[error("{0}")]
    Failed(String),

    /// The callback produced a result that has no wire representation.
    #[error("result {index} cannot be encoded: {source}")]
    Unencodable {
        /// Position of the offending result.
        index: usize,
        /// Why it cannot be encoded.
        #[source]
        source: WireError,
    },
}

impl CallbackError {
    /// Create a failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        CallbackError::Failed(message.into())
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        CallbackError::Failed(message)
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        CallbackError::Failed(message.to_string())
    }
}

/// A callback the module can reach by name.
pub trait HostFunction: Send + Sync {
    /// Run the callback on decoded arguments.
    fn call(&self, args: Vec<JsniValue>) -> CallFuture;
}

/// Shared reference to a host function.
pub type SharedFunction = Arc<dyn HostFunction>;

/// Adapts a plain closure.
pub struct SyncFunction<F>(pub F);

impl<F> HostFunction for SyncFunction<F>
where
    F: Fn(Vec<JsniValue>) -> CallbackResult + Send + Sync,
{
    fn call(&self, args: Vec<JsniValue>) -> CallFuture {
        Box::pin(std::future::ready((self.0)(args)))
    }
}

/// Adapts a closure returning a future.
pub struct AsyncFunction<F>(pub F);

impl<F, Fut> HostFunction for AsyncFunction<F>
where
    F: Fn(Vec<JsniValue>) -> Fut + Send + Sync,
    Fut: Future<Output = CallbackResult> + Send + 'static,
{
    fn call(&self, args: Vec<JsniValue>) -> CallFuture {
        Box::pin((self.0)(args))
    }
}

/// Adapts a closure over JSON values.
///
/// Arguments are converted with [`JsniValue::to_json`]; results are
/// classified with [`JsniValue::from_json`], so integral numbers come back as
/// `I64` and all other numbers as `F64`.
pub struct JsonFunction<F>(pub F);

impl<F> HostFunction for JsonFunction<F>
where
    F: Fn(Vec<Value>) -> Result<Vec<Value>, CallbackError> + Send + Sync,
{
    fn call(&self, args: Vec<JsniValue>) -> CallFuture {
        let json_args = args.iter().map(JsniValue::to_json).collect();
        let result = (self.0)(json_args).and_then(|values| {
            values
                .iter()
                .enumerate()
                .map(|(index, value)| {
                    JsniValue::from_json(value)
                        .map_err(|source| CallbackError::Unencodable { index, source })
                })
                .collect()
        });
        Box::pin(std::future::ready(result))
    }
}

/// Name to callback map.
///
/// # Example
///
/// ```
/// use jsni_host::{FunctionRegistry, JsniValue};
///
/// let registry = FunctionRegistry::new();
/// registry.register_sync("add", |args| {
///     let sum: i64 = args.iter().filter_map(JsniValue::as_i64).sum();
///     Ok(vec![JsniValue::I64(sum)])
/// });
///
/// assert!(registry.contains("add"));
/// ```
#[derive(Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, SharedFunction>,
    events: Option<Arc<EventDispatcher>>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry that reports changes to `events`.
    pub fn with_events(events: Arc<EventDispatcher>) -> Self {
        Self {
            functions: DashMap::new(),
            events: Some(events),
        }
    }

    /// Register a callback, replacing any earlier one with the same name.
    ///
    /// Returns `true` if an entry was replaced.
    pub fn register(&self, name: impl Into<String>, function: SharedFunction) -> bool {
        let name = name.into();
        let replaced = self.functions.insert(name.clone(), function).is_some();

        info!(function = %name, replaced, "Host function registered");
        if let Some(events) = &self.events {
            events.emit(DispatchEvent::FunctionRegistered { name, replaced });
        }
        replaced
    }

    /// Register a synchronous closure.
    pub fn register_sync<F>(&self, name: impl Into<String>, f: F) -> bool
    where
        F: Fn(Vec<JsniValue>) -> CallbackResult + Send + Sync + 'static,
    {
        self.register(name, Arc::new(SyncFunction(f)))
    }

    /// Register a closure that returns a future.
    pub fn register_async<F, Fut>(&self, name: impl Into<String>, f: F) -> bool
    where
        F: Fn(Vec<JsniValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.register(name, Arc::new(AsyncFunction(f)))
    }

    /// Register a closure over JSON values.
    pub fn register_json<F>(&self, name: impl Into<String>, f: F) -> bool
    where
        F: Fn(Vec<Value>) -> Result<Vec<Value>, CallbackError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(JsonFunction(f)))
    }

    /// Remove a callback.
    pub fn unregister(&self, name: &str) -> Option<SharedFunction> {
        self.functions.remove(name).map(|(name, function)| {
            info!(function = %name, "Host function unregistered");
            if let Some(events) = &self.events {
                events.emit(DispatchEvent::FunctionUnregistered { name });
            }
            function
        })
    }

    /// Look up a callback by name.
    ///
    /// The returned handle is a clone; no map guard outlives this call.
    pub fn resolve(&self, name: &str) -> Option<SharedFunction> {
        self.functions.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Check if a name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Get the number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
