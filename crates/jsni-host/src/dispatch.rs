//! The `jsni_call` entry point.
//!
//! One invocation moves through three phases:
//!
//! 1. *decoding*: read the name and argument slots out of linear memory
//! 2. *invoking*: resolve the callback and await it
//! 3. *settled*: encode the results and return the slot handle, or fail
//!
//! A failure in any phase fails the invocation with a [`HostError`]; nothing
//! is retried.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsni_core::AbiConfig;
use jsni_observe::{CallId, DispatchEvent, EventDispatcher, MetricsCollector};
use jsni_wire::{FatPtr, JsniValue};
use tracing::{debug, warn};

use crate::decode::{decode_args_counted, decode_name};
use crate::encode::encode_results_counted;
use crate::error::{HostError, HostResult};
use crate::memory::{GuestAllocator, GuestMemory};
use crate::registry::{CallbackError, FunctionRegistry};

/// State of one invocation after decoding.
#[derive(Debug, Clone)]
pub struct CallSession {
    id: CallId,
    function: String,
    args: Vec<JsniValue>,
    bytes_copied: usize,
}

impl CallSession {
    /// Decode the function name and arguments for a call.
    pub fn decode<M>(
        memory: &M,
        id: CallId,
        name_ptr: u32,
        args_ptr: u32,
        args_count: u32,
    ) -> HostResult<Self>
    where
        M: GuestMemory + ?Sized,
    {
        let function = decode_name(memory, name_ptr)?;
        let decoded = decode_args_counted(memory, args_ptr, args_count)?;
        Ok(Self {
            id,
            function,
            args: decoded.values,
            bytes_copied: decoded.bytes_copied,
        })
    }

    /// The invocation ID.
    pub fn id(&self) -> CallId {
        self.id
    }

    /// The requested function name.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// The decoded arguments.
    pub fn args(&self) -> &[JsniValue] {
        &self.args
    }
}

/// Services calls from a module against a [`FunctionRegistry`].
pub struct Dispatcher {
    registry: Arc<FunctionRegistry>,
    events: Arc<EventDispatcher>,
    metrics: Arc<MetricsCollector>,
    abi: AbiConfig,
}

impl Dispatcher {
    /// Create a dispatcher over `registry` with the default ABI names.
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            events: Arc::new(EventDispatcher::new()),
            metrics: Arc::new(MetricsCollector::new()),
            abi: AbiConfig::default(),
        }
    }

    /// Report events to `events`.
    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    /// Record metrics into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Use custom import and export names.
    pub fn with_abi(mut self, abi: AbiConfig) -> Self {
        self.abi = abi;
        self
    }

    /// The registry calls are resolved against.
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// The event dispatcher.
    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    /// The metrics collector.
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// The import and export names in use.
    pub fn abi(&self) -> &AbiConfig {
        &self.abi
    }

    /// Service one call.
    ///
    /// Returns the high word of the result slot array's fat pointer, or
    /// [`FatPtr::NO_RETURN`] when the callback produced no values. An
    /// unresolved name fails before anything is allocated or written.
    pub async fn dispatch<H>(
        &self,
        heap: &mut H,
        name_ptr: u32,
        args_ptr: u32,
        args_count: u32,
    ) -> HostResult<i32>
    where
        H: GuestAllocator + Send,
    {
        let call_id = CallId::new();
        let started = Instant::now();
        let mut function = None;

        let result = self
            .run(heap, call_id, started, name_ptr, args_ptr, args_count, &mut function)
            .await;

        if let Err(err) = &result {
            warn!(
                call_id = %call_id,
                function = ?function,
                error = %err,
                "Host call failed"
            );
            self.metrics.record_failure(function.as_deref());
            self.events.emit(DispatchEvent::CallFailed {
                call_id,
                function,
                message: err.to_string(),
                duration: started.elapsed(),
            });
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run<H>(
        &self,
        heap: &mut H,
        call_id: CallId,
        started: Instant,
        name_ptr: u32,
        args_ptr: u32,
        args_count: u32,
        function: &mut Option<String>,
    ) -> HostResult<i32>
    where
        H: GuestAllocator + Send,
    {
        let session = CallSession::decode(&*heap, call_id, name_ptr, args_ptr, args_count)?;
        let CallSession {
            id,
            function: name,
            args,
            bytes_copied,
        } = session;
        *function = Some(name.clone());

        self.metrics.record_decoded(args.len(), bytes_copied);
        debug!(call_id = %id, function = %name, args = args.len(), "Decoded host call");

        let callback = match self.registry.resolve(&name) {
            Some(callback) => callback,
            None => {
                self.metrics.record_unresolved(&name);
                return Err(HostError::UnresolvedFunction(name));
            }
        };

        self.events.emit(DispatchEvent::CallStarted {
            call_id: id,
            function: name.clone(),
            arg_count: args.len(),
        });

        let values = callback.call(args).await.map_err(|err| match err {
            CallbackError::Failed(message) => HostError::CallbackFailed {
                function: name.clone(),
                message,
            },
            CallbackError::Unencodable { index, source } => HostError::UnencodableValue {
                index,
                reason: source.to_string(),
            },
        })?;

        if values.is_empty() {
            self.complete(id, &name, None, started.elapsed());
            return Ok(FatPtr::NO_RETURN);
        }

        let encoded = encode_results_counted(heap, &values).await?;
        self.metrics.record_encoded(encoded.slots, encoded.bytes_copied);
        self.metrics
            .record_allocations(encoded.allocations, encoded.bytes_allocated);
        self.complete(id, &name, Some(encoded.slots), started.elapsed());

        debug!(call_id = %id, function = %name, results = encoded.slots, ptr = %encoded.ptr, "Encoded results");
        Ok(encoded.ptr.length_word_i32())
    }

    fn complete(&self, call_id: CallId, function: &str, result_count: Option<usize>, duration: Duration) {
        self.metrics.record_call(function, duration);
        self.events.emit(DispatchEvent::CallCompleted {
            call_id,
            function: function.to_string(),
            result_count,
            duration,
        });
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("abi", &self.abi)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_args;
    use crate::memory::BufferHeap;
    use jsni_observe::CollectingSubscriber;
    use jsni_wire::{Slot, ValueKind};

    fn dispatcher() -> (Dispatcher, Arc<CollectingSubscriber>) {
        let events = Arc::new(EventDispatcher::new());
        let collector = Arc::new(CollectingSubscriber::new(100));
        events.subscribe(collector.clone());

        let registry = Arc::new(FunctionRegistry::new());
        registry.register_sync("add", |args| {
            let sum = args.iter().filter_map(JsniValue::as_i64).sum();
            Ok(vec![JsniValue::I64(sum)])
        });
        registry.register_sync("status", |_| Ok(vec![JsniValue::from("ok")]));
        registry.register_sync("noop", |_| Ok(vec![]));
        registry.register_sync("fail", |_| Err(CallbackError::failed("boom")));

        (Dispatcher::new(registry).with_events(events), collector)
    }

    fn stage_call(heap: &mut BufferHeap, name: &str, args: &[JsniValue]) -> (u32, u32, u32) {
        let name_ptr = heap.place_name(name).unwrap();
        let slots: Vec<Slot> = args.iter().map(|a| a.to_scalar_slot().unwrap()).collect();
        let args_ptr = heap.place_slots(&slots).unwrap();
        (name_ptr, args_ptr, args.len() as u32)
    }

    #[tokio::test]
    async fn test_add() {
        let (dispatcher, events) = dispatcher();
        let mut heap = BufferHeap::default();
        let (name, args, count) =
            stage_call(&mut heap, "add", &[JsniValue::I32(5), JsniValue::I32(7)]);

        let handle = dispatcher.dispatch(&mut heap, name, args, count).await.unwrap();

        // BufferHeap hands out the slot array address as its handle.
        let results = decode_args(&heap, handle as u32, 1).unwrap();
        assert_eq!(results, vec![JsniValue::I64(12)]);
        assert_eq!(events.event_types(), vec!["call_started", "call_completed"]);

        let snapshot = dispatcher.metrics().snapshot();
        assert_eq!(snapshot.calls.call_counts.get("add"), Some(&1));
        assert_eq!(snapshot.transfer.slots_decoded, 2);
        assert_eq!(snapshot.transfer.slots_encoded, 1);
    }

    #[tokio::test]
    async fn test_string_result() {
        let (dispatcher, _) = dispatcher();
        let mut heap = BufferHeap::default();
        let (name, args, count) = stage_call(&mut heap, "status", &[]);

        let handle = dispatcher.dispatch(&mut heap, name, args, count).await.unwrap();

        let slot = heap.read_slot(handle as u32).unwrap();
        assert_eq!(slot.kind().unwrap(), ValueKind::String);
        let (offset, len) = slot.region_parts();
        assert_eq!(len, 2);
        assert_eq!(heap.read(offset, 3).unwrap(), &[0x6F, 0x6B, 0x00]);
    }

    #[tokio::test]
    async fn test_unresolved_writes_nothing() {
        let (dispatcher, events) = dispatcher();
        let mut heap = BufferHeap::default();
        let (name, args, count) = stage_call(&mut heap, "missing", &[JsniValue::I32(1)]);
        let before = heap.bytes().to_vec();

        let err = dispatcher.dispatch(&mut heap, name, args, count).await.unwrap_err();

        assert!(matches!(err, HostError::UnresolvedFunction(ref n) if n == "missing"));
        assert_eq!(heap.allocation_count(), 0);
        assert_eq!(heap.write_count(), 0);
        assert_eq!(heap.bytes(), before.as_slice());
        assert_eq!(events.event_types(), vec!["call_failed"]);

        let snapshot = dispatcher.metrics().snapshot();
        assert_eq!(snapshot.calls.unresolved_counts.get("missing"), Some(&1));
        assert_eq!(snapshot.calls.failure_counts.get("missing"), Some(&1));
    }

    #[tokio::test]
    async fn test_empty_result_returns_sentinel() {
        let (dispatcher, _) = dispatcher();
        let mut heap = BufferHeap::default();
        let (name, args, count) = stage_call(&mut heap, "noop", &[]);

        let handle = dispatcher.dispatch(&mut heap, name, args, count).await.unwrap();

        assert_eq!(handle, -1);
        assert_eq!(heap.allocation_count(), 0);
        assert_eq!(heap.write_count(), 0);
    }

    #[tokio::test]
    async fn test_re_registration_replaces() {
        let (dispatcher, _) = dispatcher();
        dispatcher
            .registry()
            .register_sync("add", |_| Ok(vec![JsniValue::I64(-1)]));

        let mut heap = BufferHeap::default();
        let (name, args, count) =
            stage_call(&mut heap, "add", &[JsniValue::I32(5), JsniValue::I32(7)]);
        let handle = dispatcher.dispatch(&mut heap, name, args, count).await.unwrap();

        assert_eq!(
            decode_args(&heap, handle as u32, 1).unwrap(),
            vec![JsniValue::I64(-1)]
        );
    }

    #[tokio::test]
    async fn test_callback_failure() {
        let (dispatcher, _) = dispatcher();
        let mut heap = BufferHeap::default();
        let (name, args, count) = stage_call(&mut heap, "fail", &[]);

        let err = dispatcher.dispatch(&mut heap, name, args, count).await.unwrap_err();

        assert!(matches!(
            err,
            HostError::CallbackFailed { ref function, ref message } if function == "fail" && message == "boom"
        ));
        assert_eq!(heap.allocation_count(), 0);
    }

    #[tokio::test]
    async fn test_json_object_result_is_unencodable() {
        let (dispatcher, events) = dispatcher();
        dispatcher
            .registry()
            .register_json("shape", |_| Ok(vec![serde_json::json!({"a": 1})]));
        let mut heap = BufferHeap::default();
        let (name, args, count) = stage_call(&mut heap, "shape", &[]);

        let err = dispatcher.dispatch(&mut heap, name, args, count).await.unwrap_err();

        assert!(matches!(err, HostError::UnencodableValue { index: 0, .. }));
        assert_eq!(heap.allocation_count(), 0);
        assert_eq!(heap.write_count(), 0);
        assert_eq!(events.event_types().last().copied(), Some("call_failed"));
        assert_eq!(
            dispatcher.metrics().snapshot().calls.failure_counts.get("shape"),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn test_unknown_tag_fails_call() {
        let (dispatcher, events) = dispatcher();
        let mut heap = BufferHeap::default();
        let name = heap.place_name("add").unwrap();
        let mut bad = [0u8; 16];
        bad[8] = 15;
        let args = heap.place(&bad).unwrap();

        let err = dispatcher.dispatch(&mut heap, name, args, 1).await.unwrap_err();

        assert!(matches!(err, HostError::Wire(jsni_wire::WireError::UnknownTag(15))));
        assert_eq!(events.event_types(), vec!["call_failed"]);
        assert_eq!(dispatcher.metrics().snapshot().total_calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_args() {
        let (dispatcher, _) = dispatcher();
        let mut heap = BufferHeap::default();
        let name = heap.place_name("add").unwrap();

        // The argument pointer is never read when the count is zero.
        let handle = dispatcher.dispatch(&mut heap, name, u32::MAX, 0).await.unwrap();
        assert_eq!(
            decode_args(&heap, handle as u32, 1).unwrap(),
            vec![JsniValue::I64(0)]
        );
    }

    #[tokio::test]
    async fn test_string_argument() {
        let registry = Arc::new(FunctionRegistry::new());
        registry.register_sync("len", |args| match args.first().and_then(JsniValue::as_str) {
            Some(s) => Ok(vec![JsniValue::U32(s.len() as u32)]),
            None => Err("expected a string".into()),
        });
        let dispatcher = Dispatcher::new(registry);

        let mut heap = BufferHeap::default();
        let name = heap.place_name("len").unwrap();
        let text = heap.place(b"hello").unwrap();
        let args = heap
            .place_slots(&[Slot::region(ValueKind::String, text, 5)])
            .unwrap();

        let handle = dispatcher.dispatch(&mut heap, name, args, 1).await.unwrap();
        assert_eq!(
            decode_args(&heap, handle as u32, 1).unwrap(),
            vec![JsniValue::U32(5)]
        );
    }
}
