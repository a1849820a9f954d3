//! Abstract metrics sink (spec.md §6).
//!
//! The core never binds to a concrete metrics backend (Prometheus exposition
//! is explicitly out of scope, spec.md §1) — it only ever calls through this
//! trait, the way the teacher crate's `TransformationManager` accumulates
//! stats behind its own `get_health()`/`get_stats()` surface rather than
//! talking to a metrics exporter directly.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Counters and histograms the engine emits, per spec.md §6.
pub trait MetricsSink: Send + Sync {
    fn incr_ingest_events(&self, source: &str, route: &str, destination: &str, by: u64);
    fn incr_events_dropped(&self, source: &str, by: u64);
    fn incr_events_failed(&self, destination: &str, by: u64);
    fn set_circuit_breaker_state(&self, destination: &str, state: i64);
    fn observe_pipeline_latency(&self, pipeline: &str, route: &str, source: &str, seconds: f64);
    fn observe_destination_flush_bytes(&self, destination: &str, bytes: u64);
}

/// A `MetricsSink` that only logs via `tracing`, for use by demo binaries and
/// tests where no real metrics backend is wired up. Mirrors the density of
/// the teacher's own `debug!`-per-event-class logging.
#[derive(Debug, Default)]
pub struct LoggingMetricsSink;

impl MetricsSink for LoggingMetricsSink {
    fn incr_ingest_events(&self, source: &str, route: &str, destination: &str, by: u64) {
        debug!(source, route, destination, by, "ingest_events_total");
    }

    fn incr_events_dropped(&self, source: &str, by: u64) {
        debug!(source, by, "events_dropped_total");
    }

    fn incr_events_failed(&self, destination: &str, by: u64) {
        debug!(destination, by, "events_failed_total");
    }

    fn set_circuit_breaker_state(&self, destination: &str, state: i64) {
        debug!(destination, state, "circuit_breaker_state");
    }

    fn observe_pipeline_latency(&self, pipeline: &str, route: &str, source: &str, seconds: f64) {
        debug!(pipeline, route, source, seconds, "pipeline_latency_seconds");
    }

    fn observe_destination_flush_bytes(&self, destination: &str, bytes: u64) {
        debug!(destination, bytes, "destination_flush_bytes");
    }
}

/// An in-memory `MetricsSink` used by integration tests to assert on emitted
/// counters without spinning up a real metrics backend.
#[derive(Default)]
pub struct RecordingMetricsSink {
    pub ingest_events: AtomicU64,
    pub events_dropped: AtomicU64,
    pub events_failed: AtomicU64,
    pub circuit_breaker_state: AtomicI64,
}

impl RecordingMetricsSink {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn incr_ingest_events(&self, _source: &str, _route: &str, _destination: &str, by: u64) {
        self.ingest_events.fetch_add(by, Ordering::Relaxed);
    }

    fn incr_events_dropped(&self, _source: &str, by: u64) {
        self.events_dropped.fetch_add(by, Ordering::Relaxed);
    }

    fn incr_events_failed(&self, _destination: &str, by: u64) {
        self.events_failed.fetch_add(by, Ordering::Relaxed);
    }

    fn set_circuit_breaker_state(&self, _destination: &str, state: i64) {
        self.circuit_breaker_state.store(state, Ordering::Relaxed);
    }

    fn observe_pipeline_latency(&self, _pipeline: &str, _route: &str, _source: &str, _seconds: f64) {}

    fn observe_destination_flush_bytes(&self, _destination: &str, _bytes: u64) {}
}
