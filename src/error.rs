//! Crate-wide error taxonomy.
//!
//! Each subsystem gets its own narrow `thiserror` enum; the engine façade
//! composes them into [`EngineError`] via `#[from]` rather than collapsing
//! everything into one monolithic error type.

use thiserror::Error;

/// Errors raised by the registry CRUD surface (`Engine::create_*` / `update_*`).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown pipeline id: {0}")]
    UnknownPipeline(crate::model::PipelineId),

    #[error("unknown destination id: {0}")]
    UnknownDestination(crate::model::DestinationId),

    #[error("unknown route id: {0}")]
    UnknownRoute(crate::model::RouteId),

    #[error("unknown source id: {0}")]
    UnknownSource(crate::model::SourceId),

    #[error("unknown capture id: {0}")]
    UnknownCapture(crate::model::CaptureId),

    #[error("invalid filter regex {pattern:?}: {message}")]
    InvalidFilter { pattern: String, message: String },

    #[error("malformed stage spec: {0}")]
    MalformedStage(String),

    #[error("destination config error: {0}")]
    DestinationConfig(String),
}

/// Errors raised while starting/stopping a source adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("bind failed on {addr}: {message}")]
    BindFailed { addr: String, message: String },

    #[error("TLS configuration load failed: {0}")]
    TlsLoadFailed(String),

    #[error("required credential missing: {0}")]
    CredentialMissing(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("adapter already running")]
    AlreadyRunning,

    #[error("adapter not running")]
    NotRunning,
}

/// Errors raised by the two stage-chain parsers.
///
/// `_raw` is never lost on a parse error — strict mode fails the event but
/// the caller is still handed back a meta-tagged event carrying `_raw`.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed segment at byte {offset}: {message}")]
    MalformedSegment { offset: usize, message: String },

    #[error("too few CSV fields: got {got}, need at least {need}")]
    TooFewFields { got: usize, need: usize },

    #[error("CSV parse error: {0}")]
    Csv(String),
}

/// Enrichment failures are always non-fatal to the event; this type exists
/// so call sites can log without the engine having to guess a message.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("no IP address resolved for event")]
    NoIpResolved,

    #[error("lookup callback failed: {0}")]
    LookupFailed(String),
}

/// Errors surfaced by a destination's network/disk write path.
#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("transient send failure: {0}")]
    Transient(String),

    #[error("permanent send failure: {0}")]
    Permanent(String),

    #[error("circuit open, batch rejected")]
    CircuitOpen,

    #[error("spill queue error: {0}")]
    Spill(#[from] SpillError),
}

/// Errors from the disk-backed spill queue.
#[derive(Debug, Error)]
pub enum SpillError {
    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("spill queue over byte cap, oldest entries dropped")]
    OverCapacity,
}

/// Top-level error returned by the [`crate::engine::Engine`] façade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Destination(#[from] DestinationError),
}
