//! JSNI Observability
//!
//! This crate provides observability for the JSNI dispatcher:
//!
//! - [`EventDispatcher`]: fans [`DispatchEvent`]s out to subscribers
//! - [`LoggingSubscriber`], [`CollectingSubscriber`]: ready-made subscribers
//! - [`MetricsCollector`]: per-function call counts and marshaling volume
//!
//! # Event Subscription
//!
//! ```
//! use std::sync::Arc;
//! use jsni_observe::{CallId, CollectingSubscriber, DispatchEvent, EventDispatcher};
//!
//! let dispatcher = EventDispatcher::new();
//! let collector = Arc::new(CollectingSubscriber::new(16));
//! dispatcher.subscribe(collector.clone());
//!
//! dispatcher.emit(DispatchEvent::CallStarted {
//!     call_id: CallId::new(),
//!     function: "add".to_string(),
//!     arg_count: 2,
//! });
//! assert_eq!(collector.len(), 1);
//! ```

pub mod events;
pub mod metrics;

// Re-export main types
pub use events::{
    CallId, CollectingSubscriber, DispatchEvent, EventDispatcher, EventSubscriber,
    LoggingSubscriber,
};
pub use metrics::{CallMetrics, MetricsCollector, MetricsSnapshot, TransferMetrics};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::events::{DispatchEvent, EventDispatcher, EventSubscriber};
    pub use crate::metrics::{MetricsCollector, MetricsSnapshot};
}
