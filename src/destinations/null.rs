//! Null destination (spec.md §4.8): discards every batch after recording
//! it, used for pipeline development and as the implicit dead-letter sink
//! target for tests.

use super::driver::{Batch, DestinationDriver, SendError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Default)]
pub struct NullDriver {
    batches_accepted: AtomicU64,
    events_accepted: AtomicU64,
}

impl NullDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches_accepted(&self) -> u64 {
        self.batches_accepted.load(Ordering::Relaxed)
    }

    pub fn events_accepted(&self) -> u64 {
        self.events_accepted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DestinationDriver for NullDriver {
    fn destination_type(&self) -> &'static str {
        "null"
    }

    async fn send(&self, batch: &Batch) -> Result<(), SendError> {
        self.batches_accepted.fetch_add(1, Ordering::Relaxed);
        self.events_accepted.fetch_add(batch.event_count as u64, Ordering::Relaxed);
        debug!(events = batch.event_count, bytes = batch.payload.len(), "null sink discarded batch");
        Ok(())
    }
}
