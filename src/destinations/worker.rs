//! Per-destination batcher/retrier/circuit-breaker/spill worker (spec.md
//! §4.8, C8).
//!
//! One [`DestinationWorker`] per configured destination. `write_event`
//! appends to the pending batch and triggers a flush once `max_events` or
//! `max_bytes` is reached; a background task (`run_flush_timer`) flushes on
//! `flush_interval` regardless. A second background task
//! (`run_spill_replay`) re-submits spilled batches, oldest first, whenever
//! the circuit is closed.

use super::circuit_breaker::CircuitBreaker;
use super::driver::{Batch, DestinationDriver, SendError};
use super::serialize::serialize_batch;
use crate::clock::Clock;
use crate::event::Event;
use crate::metrics::MetricsSink;
use crate::model::{BatchConfig, DestinationStatus};
use crate::spill::SpillQueue;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

struct PendingBatch {
    events: Vec<Event>,
    bytes: usize,
}

impl PendingBatch {
    fn new() -> Self {
        Self { events: Vec::new(), bytes: 0 }
    }

    fn take(&mut self) -> Vec<Event> {
        self.bytes = 0;
        std::mem::take(&mut self.events)
    }
}

pub struct DestinationWorker {
    name: String,
    driver: Arc<dyn DestinationDriver>,
    batch_config: BatchConfig,
    gzip: bool,
    breaker: CircuitBreaker,
    spill: Option<SpillQueue>,
    dead_letter_path: Option<String>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    inflight: Arc<Semaphore>,
    pending: Mutex<PendingBatch>,
    status: Mutex<DestinationStatus>,
    shutdown_grace: Duration,
    stopping: AtomicBool,
}

impl DestinationWorker {
    pub fn new(
        name: impl Into<String>,
        driver: Arc<dyn DestinationDriver>,
        batch_config: BatchConfig,
        circuit_breaker: CircuitBreaker,
        spill: Option<SpillQueue>,
        dead_letter_path: Option<String>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
        shutdown_grace: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            gzip: batch_config.gzip,
            driver,
            inflight: Arc::new(Semaphore::new(batch_config.max_inflight.max(1))),
            batch_config,
            breaker: circuit_breaker,
            spill,
            dead_letter_path,
            metrics,
            clock,
            pending: Mutex::new(PendingBatch::new()),
            status: Mutex::new(DestinationStatus::Disconnected),
            shutdown_grace,
            stopping: AtomicBool::new(false),
        })
    }

    pub async fn status(&self) -> DestinationStatus {
        *self.status.lock().await
    }

    async fn set_status(&self, status: DestinationStatus) {
        let mut guard = self.status.lock().await;
        if *guard != status {
            info!(destination = %self.name, from = ?*guard, to = ?status, "destination status changed");
            *guard = status;
        }
    }

    /// Append one event to the pending batch; flushes inline once a
    /// threshold is crossed, per spec.md §4.8.
    pub async fn write_event(self: &Arc<Self>, event: Event) {
        let should_flush = {
            let mut pending = self.pending.lock().await;
            let size = estimate_size(&event);
            pending.events.push(event);
            pending.bytes += size;
            pending.events.len() >= self.batch_config.max_events || pending.bytes >= self.batch_config.max_bytes
        };
        if should_flush {
            self.flush().await;
        }
    }

    /// Flush whatever is currently pending. A no-op if the batch is empty.
    pub async fn flush(self: &Arc<Self>) {
        let events = {
            let mut pending = self.pending.lock().await;
            if pending.events.is_empty() {
                return;
            }
            pending.take()
        };
        self.dispatch(events).await;
    }

    async fn dispatch(self: &Arc<Self>, events: Vec<Event>) {
        let now = self.clock.monotonic_now();
        if !self.breaker.try_acquire(now) {
            self.set_status(DestinationStatus::Degraded).await;
            self.spill_or_drop(events).await;
            return;
        }

        let permit = Arc::clone(&self.inflight)
            .acquire_owned()
            .await
            .expect("semaphore never closed");
        self.set_status(DestinationStatus::Connecting).await;
        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            worker.send_with_retry(events).await;
            drop(permit);
        });
        // Backpressure: block the caller only long enough to observe the
        // bounded worker pool is saturated, matching spec.md §5's "bounded
        // worker-pool for in-flight destination writes".
        let _ = handle.await;
    }

    async fn send_with_retry(self: &Arc<Self>, events: Vec<Event>) {
        let flushed_at = self.clock.now();
        let payload = serialize_batch(&events, self.gzip);
        let event_count = events.len();
        let batch = Batch { payload, event_count, flushed_at };
        self.metrics.observe_destination_flush_bytes(&self.name, batch.payload.len() as u64);

        let max_attempts = self.batch_config.retry_attempts.max(1);
        let mut last_err: Option<SendError> = None;

        for attempt in 0..max_attempts {
            match self.driver.send(&batch).await {
                Ok(()) => {
                    self.breaker.record_success(self.clock.monotonic_now());
                    self.set_status(DestinationStatus::Connected).await;
                    self.metrics.set_circuit_breaker_state(&self.name, 0);
                    debug!(destination = %self.name, events = event_count, attempt, "batch delivered");
                    return;
                }
                Err(err) => {
                    let transient = self.driver.is_transient(&err);
                    warn!(destination = %self.name, attempt, transient, %err, "destination write failed");
                    last_err = Some(err);
                    if !transient {
                        break;
                    }
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(backoff_with_jitter(attempt)).await;
                    }
                }
            }
        }

        self.breaker.record_failure(self.clock.monotonic_now());
        self.metrics.set_circuit_breaker_state(&self.name, self.breaker.state(self.clock.monotonic_now()).as_gauge());
        if self.breaker.state(self.clock.monotonic_now()) != super::circuit_breaker::BreakerState::Closed {
            self.set_status(DestinationStatus::Degraded).await;
        }
        warn!(destination = %self.name, err = ?last_err, "retry budget exhausted, falling back");
        self.handle_exhaustion(events).await;
    }

    /// After retry exhaustion: dead-letter if configured, else spill, else
    /// drop and count, per spec.md §4.8.
    async fn handle_exhaustion(&self, events: Vec<Event>) {
        if let Some(path_template) = &self.dead_letter_path {
            if self.write_dead_letter(path_template, &events).await.is_ok() {
                self.metrics.incr_events_failed(&self.name, events.len() as u64);
                return;
            }
        }
        self.spill_or_drop(events).await;
    }

    async fn spill_or_drop(&self, events: Vec<Event>) {
        if let Some(spill) = &self.spill {
            match spill.push(&events) {
                Ok(()) => return,
                Err(err) => warn!(destination = %self.name, %err, "spill failed, dropping batch"),
            }
        }
        self.metrics.incr_events_dropped(&self.name, events.len() as u64);
    }

    async fn write_dead_letter(&self, path_template: &str, events: &[Event]) -> std::io::Result<()> {
        let path = super::path_template::resolve(path_template, self.clock.now());
        if let Some(parent) = std::path::Path::new(&path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        let body = serialize_batch(events, false);
        file.write_all(&body).await?;
        Ok(())
    }

    /// Background task: flush on a fixed period regardless of batch fill.
    pub async fn run_flush_timer(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.batch_config.flush_interval_ms.max(1)));
        loop {
            interval.tick().await;
            if self.stopping.load(Ordering::Relaxed) {
                return;
            }
            self.flush().await;
        }
    }

    /// Background task: while the circuit is closed, replay spilled batches
    /// oldest-first, one at a time, per spec.md §4.8 "Spill replay".
    pub async fn run_spill_replay(self: Arc<Self>) {
        if self.spill.is_none() {
            return;
        }
        loop {
            if self.stopping.load(Ordering::Relaxed) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
            let Some(spill) = &self.spill else { return };
            if self.breaker.state(self.clock.monotonic_now()) != super::circuit_breaker::BreakerState::Closed {
                continue;
            }
            match spill.peek_oldest() {
                Ok(Some((entry, batch))) => {
                    let flushed_at = self.clock.now();
                    let payload = serialize_batch(&batch, self.gzip);
                    let request = Batch { payload, event_count: batch.len(), flushed_at };
                    match self.driver.send(&request).await {
                        Ok(()) => {
                            self.breaker.record_success(self.clock.monotonic_now());
                            if let Err(err) = spill.remove(&entry) {
                                warn!(%err, "failed to remove replayed spill entry");
                            }
                        }
                        Err(err) => {
                            debug!(%err, "spill replay attempt failed, will retry");
                            self.breaker.record_failure(self.clock.monotonic_now());
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "spill queue unreadable during replay"),
            }
        }
    }

    /// Delete-time drain: stop accepting new background work, flush or spill
    /// whatever is pending, within `shutdown_grace`.
    pub async fn drain(self: &Arc<Self>) {
        self.stopping.store(true, Ordering::Relaxed);
        self.set_status(DestinationStatus::Draining).await;
        let grace = self.shutdown_grace;
        let pending = {
            let mut pending = self.pending.lock().await;
            pending.take()
        };
        if !pending.is_empty() {
            let result = tokio::time::timeout(grace, self.dispatch_for_drain(pending.clone())).await;
            if result.is_err() {
                warn!(destination = %self.name, "drain exceeded shutdown grace, spilling remainder");
                self.spill_or_drop(pending).await;
            }
        }
        self.set_status(DestinationStatus::Released).await;
    }

    async fn dispatch_for_drain(self: &Arc<Self>, events: Vec<Event>) {
        self.send_with_retry(events).await;
    }
}

fn estimate_size(event: &Event) -> usize {
    serde_json::to_vec(event).map(|v| v.len()).unwrap_or(0)
}

/// Exponential backoff (base 100ms, doubling) with +/-20% jitter, per
/// spec.md §4.8 "exponential backoff up to retry_attempts with jitter".
fn backoff_with_jitter(attempt: u32) -> Duration {
    let base_ms = 100u64.saturating_mul(1u64 << attempt.min(10));
    let jitter_fraction: f64 = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_millis(((base_ms as f64) * jitter_fraction) as u64)
}
