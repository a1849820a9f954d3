//! Destination driver seam (spec.md §9 design note: "leave to the
//! destination adapter, require only that it expose `isTransient(err) ->
//! bool`").
//!
//! Every destination type — Sentinel, S3, ADLS Gen2, the null sink — sends
//! an already-serialized batch and classifies its own errors. The worker
//! (`worker.rs`) never inspects HTTP status codes or I/O error kinds
//! itself; it only asks the driver whether a given failure is worth
//! retrying.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A destination-specific send failure, carrying enough for logging and for
/// `is_transient` to classify.
#[derive(Debug, Clone)]
pub struct SendError {
    pub status: Option<u16>,
    pub message: String,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "http {status}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl SendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { status: None, message: message.into() }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self { status: Some(status), message: message.into() }
    }
}

/// One already-serialized, already-batched write. `flushed_at` feeds path
/// templating (`${yyyy}`, `${MM}`, ...) for file-shaped destinations.
pub struct Batch {
    pub payload: Vec<u8>,
    pub event_count: usize,
    pub flushed_at: DateTime<Utc>,
}

#[async_trait]
pub trait DestinationDriver: Send + Sync {
    fn destination_type(&self) -> &'static str;

    /// Send one batch. Transient vs permanent is for the caller to decide
    /// via [`DestinationDriver::is_transient`] — this method just reports
    /// what happened.
    async fn send(&self, batch: &Batch) -> Result<(), SendError>;

    /// Default classification: 5xx, 429 (throttling) and 408 (timeout) are
    /// transient; any other HTTP status is permanent; connection-shaped
    /// errors (no status code) are treated as transient. Override for a
    /// destination whose SDK has finer-grained error types.
    fn is_transient(&self, err: &SendError) -> bool {
        match err.status {
            Some(status) => status >= 500 || status == 429 || status == 408,
            None => true,
        }
    }
}
