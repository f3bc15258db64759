//! Observable events emitted by the dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier correlating the events of one dispatch invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(Uuid);

impl CallId {
    /// Create a new random call ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events observed while registering and dispatching host functions.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// A function was registered.
    FunctionRegistered {
        /// Function name.
        name: String,
        /// Whether an earlier registration was replaced.
        replaced: bool,
    },
    /// A function was removed from the registry.
    FunctionUnregistered {
        /// Function name.
        name: String,
    },
    /// Arguments were decoded and the callback is about to run.
    CallStarted {
        /// Invocation ID.
        call_id: CallId,
        /// Function name.
        function: String,
        /// Number of decoded arguments.
        arg_count: usize,
    },
    /// The callback settled and its results were written back.
    CallCompleted {
        /// Invocation ID.
        call_id: CallId,
        /// Function name.
        function: String,
        /// Number of result slots, or `None` for no return value.
        result_count: Option<usize>,
        /// Time from decoding to the encoded result.
        duration: Duration,
    },
    /// The invocation failed.
    CallFailed {
        /// Invocation ID.
        call_id: CallId,
        /// Function name, if it was decoded.
        function: Option<String>,
        /// Error message.
        message: String,
        /// Time until the failure.
        duration: Duration,
    },
}

impl DispatchEvent {
    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            DispatchEvent::FunctionRegistered { .. } => "function_registered",
            DispatchEvent::FunctionUnregistered { .. } => "function_unregistered",
            DispatchEvent::CallStarted { .. } => "call_started",
            DispatchEvent::CallCompleted { .. } => "call_completed",
            DispatchEvent::CallFailed { .. } => "call_failed",
        }
    }
}

/// Subscriber for dispatch events.
pub trait EventSubscriber: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DispatchEvent);

    /// Event types this subscriber wants. `None` receives everything.
    fn event_filter(&self) -> Option<Vec<&'static str>> {
        None
    }
}

/// Subscriber that forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct LoggingSubscriber;

impl LoggingSubscriber {
    /// Create a new logging subscriber.
    pub fn new() -> Self {
        Self
    }
}

impl EventSubscriber for LoggingSubscriber {
    fn on_event(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::FunctionRegistered { name, replaced } => {
                tracing::debug!(
                    event = "function_registered",
                    name = name,
                    replaced = replaced,
                    "Function registered"
                );
            }
            DispatchEvent::FunctionUnregistered { name } => {
                tracing::debug!(event = "function_unregistered", name = name, "Function unregistered");
            }
            DispatchEvent::CallStarted {
                call_id,
                function,
                arg_count,
            } => {
                tracing::trace!(
                    event = "call_started",
                    call_id = %call_id,
                    function = function,
                    args = arg_count,
                    "Call started"
                );
            }
            DispatchEvent::CallCompleted {
                call_id,
                function,
                result_count,
                duration,
            } => {
                tracing::debug!(
                    event = "call_completed",
                    call_id = %call_id,
                    function = function,
                    results = ?result_count,
                    duration_us = duration.as_micros(),
                    "Call completed"
                );
            }
            DispatchEvent::CallFailed {
                call_id,
                function,
                message,
                duration,
            } => {
                tracing::warn!(
                    event = "call_failed",
                    call_id = %call_id,
                    function = ?function,
                    error = message,
                    duration_us = duration.as_micros(),
                    "Call failed"
                );
            }
        }
    }
}

/// A subscriber that keeps events for later inspection.
pub struct CollectingSubscriber {
    events: RwLock<Vec<(Instant, DispatchEvent)>>,
    max_events: usize,
}

impl CollectingSubscriber {
    /// Create a subscriber that keeps at most `max_events` events.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            max_events,
        }
    }

    /// Get collected events.
    pub fn events(&self) -> Vec<(Instant, DispatchEvent)> {
        self.events.read().clone()
    }

    /// Event type names in arrival order.
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(|(_, e)| e.event_type()).collect()
    }

    /// Clear collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Get event count.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl EventSubscriber for CollectingSubscriber {
    fn on_event(&self, event: &DispatchEvent) {
        let mut events = self.events.write();
        if events.len() < self.max_events {
            events.push((Instant::now(), event.clone()));
        }
    }
}

/// Fans events out to subscribers.
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Remove all subscribers.
    pub fn clear_subscribers(&self) {
        self.subscribers.write().clear();
    }

    /// Get subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Emit an event to all interested subscribers.
    pub fn emit(&self, event: DispatchEvent) {
        let subscribers = self.subscribers.read();
        for subscriber in subscribers.iter() {
            if let Some(filter) = subscriber.event_filter() {
                if !filter.contains(&event.event_type()) {
                    continue;
                }
            }
            subscriber.on_event(&event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
