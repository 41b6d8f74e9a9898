//! Fire-and-forget counters and latencies.
//!
//! Telemetry never fails or slows the primary operation; the trait is the
//! seam where an exporter would hang without the library depending on one.

use std::time::Duration;

pub const INSERT_BLOB_REQUEST: &str = "insert_blob_request";
pub const INSERT_BLOB_SUCCESS_REQUEST: &str = "insert_blob_success_request";

pub trait Telemetry: Send + Sync {
    fn incr_counter(&self, key: &str);
    fn record_latency(&self, key: &str, elapsed: Duration);
}

pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn incr_counter(&self, _key: &str) {}
    fn record_latency(&self, _key: &str, _elapsed: Duration) {}
}

/// Emits metrics as structured log lines.
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn incr_counter(&self, key: &str) {
        tracing::info!(metric = key, "counter");
    }

    fn record_latency(&self, key: &str, elapsed: Duration) {
        tracing::info!(metric = key, elapsed_ms = elapsed.as_millis() as u64, "latency");
    }
}

/// Counts into a map; test double.
#[derive(Default)]
pub struct RecordingTelemetry {
    counters: std::sync::Mutex<std::collections::HashMap<String, u64>>,
}

impl RecordingTelemetry {
    #[must_use]
    pub fn counter(&self, key: &str) -> u64 {
        self.counters
            .lock()
            .expect("telemetry counters poisoned")
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

impl Telemetry for RecordingTelemetry {
    fn incr_counter(&self, key: &str) {
        *self
            .counters
            .lock()
            .expect("telemetry counters poisoned")
            .entry(key.to_string())
            .or_insert(0) += 1;
    }

    fn record_latency(&self, _key: &str, _elapsed: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_telemetry_counts() {
        let telemetry = RecordingTelemetry::default();
        telemetry.incr_counter(INSERT_BLOB_REQUEST);
        telemetry.incr_counter(INSERT_BLOB_REQUEST);
        assert_eq!(telemetry.counter(INSERT_BLOB_REQUEST), 2);
        assert_eq!(telemetry.counter(INSERT_BLOB_SUCCESS_REQUEST), 0);
    }
}
