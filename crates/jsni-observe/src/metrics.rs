//! Metrics collected while dispatching host calls.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Collects per-function call statistics and marshaling volume.
#[derive(Default)]
pub struct MetricsCollector {
    calls: RwLock<CallMetrics>,
    transfer: RwLock<TransferMetrics>,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed call.
    pub fn record_call(&self, function: &str, duration: Duration) {
        let mut calls = self.calls.write();
        *calls.call_counts.entry(function.to_string()).or_insert(0) += 1;
        *calls
            .call_durations
            .entry(function.to_string())
            .or_insert(Duration::ZERO) += duration;
    }

    /// Record a failed call. `function` is `None` when the name never decoded.
    pub fn record_failure(&self, function: Option<&str>) {
        let mut calls = self.calls.write();
        let key = function.unwrap_or("<undecoded>").to_string();
        *calls.failure_counts.entry(key).or_insert(0) += 1;
    }

    /// Record a call to a name with no registered callback.
    pub fn record_unresolved(&self, function: &str) {
        *self
            .calls
            .write()
            .unresolved_counts
            .entry(function.to_string())
            .or_insert(0) += 1;
    }

    /// Record argument slots read from the module.
    pub fn record_decoded(&self, slots: usize, bytes_copied: usize) {
        let mut transfer = self.transfer.write();
        transfer.slots_decoded += slots as u64;
        transfer.bytes_copied_in += bytes_copied as u64;
    }

    /// Record result slots written into the module.
    pub fn record_encoded(&self, slots: usize, bytes_copied: usize) {
        let mut transfer = self.transfer.write();
        transfer.slots_encoded += slots as u64;
        transfer.bytes_copied_out += bytes_copied as u64;
    }

    /// Record calls into the module's allocators.
    pub fn record_allocations(&self, count: usize, bytes: u64) {
        let mut transfer = self.transfer.write();
        transfer.allocations += count as u64;
        transfer.bytes_allocated += bytes;
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls: self.calls.read().clone(),
            transfer: self.transfer.read().clone(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        *self.calls.write() = CallMetrics::default();
        *self.transfer.write() = TransferMetrics::default();
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("calls", &*self.calls.read())
            .field("transfer", &*self.transfer.read())
            .finish()
    }
}

/// Snapshot of collected metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Call metrics.
    pub calls: CallMetrics,
    /// Marshaling volume.
    pub transfer: TransferMetrics,
}

impl MetricsSnapshot {
    /// Total successful calls across all functions.
    pub fn total_calls(&self) -> u64 {
        self.calls.call_counts.values().sum()
    }

    /// Total failed calls, including unresolved names.
    pub fn total_failures(&self) -> u64 {
        self.calls.failure_counts.values().sum()
    }

    /// Convert to a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Convert to a pretty-printed JSON string.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Per-function call statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallMetrics {
    /// Successful calls per function.
    pub call_counts: HashMap<String, u64>,
    /// Failed calls per function.
    pub failure_counts: HashMap<String, u64>,
    /// Calls per unregistered name.
    pub unresolved_counts: HashMap<String, u64>,
    /// Total time per function.
    #[serde(with = "duration_map_serde")]
    pub call_durations: HashMap<String, Duration>,
}

/// Volume of data moved across the boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferMetrics {
    /// Argument slots decoded.
    pub slots_decoded: u64,
    /// Result slots encoded.
    pub slots_encoded: u64,
    /// String and byte payload bytes copied out of the module.
    pub bytes_copied_in: u64,
    /// String and byte payload bytes copied into the module.
    pub bytes_copied_out: u64,
    /// Calls into the module's allocators.
    pub allocations: u64,
    /// Bytes requested from the module's allocators.
    pub bytes_allocated: u64,
}

/// Durations serialized as nanoseconds.
mod duration_map_serde {
    use std::collections::HashMap;
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(map: &HashMap<String, Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        map.iter()
            .map(|(k, v)| (k.clone(), v.as_nanos() as u64))
            .collect::<HashMap<String, u64>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HashMap<String, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = HashMap::<String, u64>::deserialize(deserializer)?;
        Ok(nanos
            .into_iter()
            .map(|(k, v)| (k, Duration::from_nanos(v)))
            .collect())
    }
}
