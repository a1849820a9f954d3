//! Synthetic event generator (spec.md §4.9, §6, C9).
//!
//! Emits a configurable steady-state rate (`events_per_second`) spread over
//! `worker_count` tasks, each producing events in batches of 100 (per
//! spec.md §4.9) and sleeping just long enough between batches to keep the
//! aggregate rate on target. Useful for load-testing the pipeline/
//! destination path without a real upstream.

use super::{IngestSink, SourceAdapter};
use crate::clock::Clock;
use crate::error::AdapterError;
use crate::model::{SourceId, SyntheticConfig};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Messages generated per tick, per spec.md §4.9 ("events are generated in
/// batches of 100").
const BATCH_SIZE: usize = 100;

pub struct SyntheticAdapter {
    source_id: SourceId,
    config: SyntheticConfig,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl SyntheticAdapter {
    pub fn new(source_id: SourceId, config: SyntheticConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            source_id,
            config,
            clock,
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SourceAdapter for SyntheticAdapter {
    async fn start(&self, sink: Arc<dyn IngestSink>) -> Result<(), AdapterError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AdapterError::AlreadyRunning);
        }
        let worker_count = self.config.worker_count.max(1);
        let per_worker_eps = (self.config.events_per_second as f64 / worker_count as f64).max(1.0);
        let tick_period = Duration::from_secs_f64(BATCH_SIZE as f64 / per_worker_eps);
        let source_id = self.source_id;
        info!(
            source = %source_id,
            worker_count,
            events_per_second = self.config.events_per_second,
            "synthetic source starting"
        );

        for worker_index in 0..worker_count {
            let sink = sink.clone();
            let cancel = self.cancel.clone();
            let clock = self.clock.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tick_period);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            let batch = generate_batch(worker_index, clock.as_ref());
                            sink.ingest(source_id, batch).await;
                        }
                    }
                }
            });
        }

        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(AdapterError::NotRunning);
        }
        self.cancel.cancel();
        Ok(())
    }
}

fn generate_batch(worker_index: usize, clock: &dyn Clock) -> Vec<String> {
    let now = clock.now();
    let mut rng = rand::thread_rng();
    (0..BATCH_SIZE)
        .map(|i| {
            let severity = ["info", "warning", "error", "critical"][rng.gen_range(0..4)];
            let ip = format!(
                "{}.{}.{}.{}",
                rng.gen_range(1..255),
                rng.gen_range(0..255),
                rng.gen_range(0..255),
                rng.gen_range(1..255)
            );
            format!(
                "{} synthetic, worker={worker_index}, seq={i}, severity={severity}, client_ip={ip}, msg=\"synthetic event\"",
                now.to_rfc3339()
            )
        })
        .collect()
}
