//! LogHub (spec.md §4.2, C2): fan-out point between source adapters and the
//! rest of the engine. Owns one ring buffer per source plus a bounded,
//! drop-on-full broadcast channel that live subscribers (capture sessions,
//! the stage executor) read from.

use crate::event::Event;
use crate::model::{CaptureId, SourceId};
use crate::ring_buffer::RingBuffer;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Subscriber channel depth; generous enough that a slow capture session
/// doesn't cause routine publishes to block, per spec.md §4.2's "never
/// blocks the publisher" requirement.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 4096;

struct SourceState {
    buffer: Arc<RingBuffer>,
    publisher: broadcast::Sender<Event>,
}

/// Output format for a capture-to-file session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    /// One `_raw` line per event.
    Log,
    /// One JSON object per line (newline-delimited JSON).
    Json,
}

/// A live recording of a source's event stream to a file on disk.
pub struct CaptureSession {
    file: Mutex<tokio::fs::File>,
    format: CaptureFormat,
}

impl CaptureSession {
    async fn write_event(&self, event: &Event) -> std::io::Result<()> {
        let line = match self.format {
            CaptureFormat::Log => format!("{}\n", event.raw()),
            CaptureFormat::Json => format!("{}\n", event.to_json()),
        };
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await
    }
}

pub struct LogHub {
    sources: DashMap<SourceId, SourceState>,
    captures: DashMap<CaptureId, CancellationToken>,
}

impl LogHub {
    pub fn new() -> Self {
        Self {
            sources: DashMap::new(),
            captures: DashMap::new(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a source, creating its ring buffer and publish channel.
    /// Idempotent: re-registering an existing source id is a no-op.
    pub fn register_source(&self, id: SourceId, buffer_capacity: usize) {
        if self.sources.contains_key(&id) {
            return;
        }
        let (publisher, _) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.sources.insert(
            id,
            SourceState {
                buffer: Arc::new(RingBuffer::new(buffer_capacity)),
                publisher,
            },
        );
    }

    pub fn unregister_source(&self, id: SourceId) {
        self.sources.remove(&id);
    }

    /// Publish an event for a source: stores it in the ring buffer and
    /// broadcasts it to any live subscribers. Never blocks — a subscriber
    /// that can't keep up simply misses events and is the one that logs it
    /// on its next recv (spec.md §4.2 drop semantics).
    pub fn publish(&self, id: SourceId, event: Event) {
        let Some(state) = self.sources.get(&id) else {
            warn!(source = %id, "publish to unregistered source");
            return;
        };
        state.buffer.add(event.clone());
        // broadcast::Sender::send only errs when there are zero receivers,
        // which is the common case when nothing is tailing this source.
        let _ = state.publisher.send(event);
    }

    pub fn tail(&self, id: SourceId, n: usize) -> Vec<Event> {
        self.sources
            .get(&id)
            .map(|s| s.buffer.tail(n))
            .unwrap_or_default()
    }

    pub fn ring_buffer(&self, id: SourceId) -> Option<Arc<RingBuffer>> {
        self.sources.get(&id).map(|s| s.buffer.clone())
    }

    /// Subscribe to a source's live stream, for a capture session or any
    /// other consumer that wants events as they arrive.
    pub fn subscribe(&self, id: SourceId) -> Option<broadcast::Receiver<Event>> {
        self.sources.get(&id).map(|s| s.publisher.subscribe())
    }

    /// Open a file and start copying a source's live stream into it,
    /// registered under `capture_id` so [`LogHub::stop_capture`] can later
    /// flush and close it on demand rather than only on hub teardown.
    pub async fn start_capture(
        &self,
        id: SourceId,
        capture_id: CaptureId,
        path: PathBuf,
        format: CaptureFormat,
    ) -> std::io::Result<()> {
        let file = tokio::fs::File::create(&path).await?;
        let session = Arc::new(CaptureSession {
            file: Mutex::new(file),
            format,
        });
        let mut rx = self.subscribe(id).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "source not registered")
        })?;
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => {
                            if let Err(err) = session.write_event(&event).await {
                                warn!(%err, "capture session write failed");
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "capture session lagged, events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            let mut file = session.file.lock().await;
            let _ = file.flush().await;
        });
        self.captures.insert(capture_id, cancel);
        Ok(())
    }

    /// Flush and close a running capture session. Fails if `capture_id` is
    /// unknown (already stopped, or never started), per spec.md §4.2.
    pub fn stop_capture(&self, capture_id: CaptureId) -> Result<(), CaptureId> {
        match self.captures.remove(&capture_id) {
            Some((_, cancel)) => {
                cancel.cancel();
                Ok(())
            }
            None => Err(capture_id),
        }
    }
}

impl Default for LogHub {
    fn default() -> Self {
        Self::new()
    }
}
