//! Configuration data model (spec.md §3): sources, pipelines, routes and
//! destinations as already-validated typed structs handed in by an external
//! control plane (parsing/validating TOML or YAML is explicitly out of
//! scope — see spec.md §1 Non-goals).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid as UuidImpl;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub UuidImpl);

        impl $name {
            pub fn new() -> Self {
                Self(UuidImpl::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<UuidImpl> for $name {
            fn from(u: UuidImpl) -> Self {
                Self(u)
            }
        }
    };
}

id_newtype!(SourceId);
id_newtype!(PipelineId);
id_newtype!(RouteId);
id_newtype!(DestinationId);
id_newtype!(CaptureId);

/// Which source adapter implementation to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    SyslogTls,
    Synthetic,
    AkamaiDatastream2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Stopped,
    Starting,
    Running,
    Degraded,
    Failed,
}

/// Per-source buffer sizing (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Rounded up to the next power of two by the ring buffer constructor.
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyslogTlsConfig {
    pub bind_addr: String,
    pub cert_path: String,
    pub key_path: String,
    /// CIDR blocks allowed to connect; empty means allow all.
    pub allow_cidrs: Vec<String>,
    pub max_connections: usize,
    pub idle_timeout_secs: u64,
    /// Batching-collector thresholds shared by every connection on this
    /// source (spec.md §4.9).
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub events_per_second: u32,
    pub worker_count: usize,
}

/// Akamai DataStream 2 poller config (spec.md §6): the credential tuple is
/// handed in already resolved by the out-of-scope control plane (Akamai/Entra
/// OAuth token exchange is explicitly out of scope, spec.md §1) — this crate
/// only performs the documented HTTP polling contract against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AkamaiConfig {
    pub host: String,
    pub client_token: String,
    pub client_secret: String,
    pub access_token: String,
    pub poll_interval_secs: u64,
    pub streams: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub source_type: SourceType,
    pub buffer: BufferConfig,
    pub syslog_tls: Option<SyslogTlsConfig>,
    pub synthetic: Option<SyntheticConfig>,
    pub akamai: Option<AkamaiConfig>,
    pub status: SourceStatus,
    pub enabled: bool,
    /// Unix seconds of the last `processBatch` call for this source; `0`
    /// until the first batch arrives. Updated via [`crate::engine::Engine`]'s
    /// side runtime-stats table, not the CRUD registry, so hot-path writes
    /// never take the registry write lock (spec.md §4.10 concurrency note).
    pub last_seen_unix: i64,
    pub produced_count: u64,
}

/// Strictness for the two stage-chain parsers (spec.md §4.3, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// Malformed segments/lines are skipped; the event is never failed.
    Lenient,
    /// The first malformed segment/line fails the event; `_raw` is kept and
    /// `_parse_error` is recorded by the stage executor.
    Strict,
}

impl Default for ParseMode {
    fn default() -> Self {
        ParseMode::Lenient
    }
}

/// One step of a pipeline's stage chain (spec.md §4.7). `geoip_enrich` and
/// `asn_enrich` carry no IP source of their own — they read
/// [`Pipeline::ip_source`], per spec.md §4.4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Stage {
    ParseVersaKvp { mode: ParseMode },
    ParsePaloAltoCsv { mode: ParseMode },
    GeoipEnrich,
    AsnEnrich,
    /// `include` (`exclude: false`) passes only events whose `field` matches
    /// one of `values`; `exclude: true` fails only on a match. Case
    /// insensitive; falls back to a `field=value` regex scan of `_raw` when
    /// the structured field is absent (spec.md §4.7).
    KvFilter { field: String, values: Vec<String>, exclude: bool },
    Rename { from: String, to: String },
    Flatten { field: String },
    EnsureTimestamp { field: String },
    /// `typed_tokens=true` uses per-kind tokens (`[SSN]`, `[EMAIL]`, ...);
    /// otherwise every match is replaced with `token`.
    RedactPii { token: String, typed_tokens: bool },
    Passthrough,
}

impl Stage {
    /// Ordering rank used by [`normalize_stage_order`]: parsers, then
    /// enrichment, then filters, then everything else (rewrites), per the
    /// invariant in spec.md §3.
    fn rank(&self) -> u8 {
        match self {
            Stage::ParseVersaKvp { .. } | Stage::ParsePaloAltoCsv { .. } => 0,
            Stage::GeoipEnrich | Stage::AsnEnrich => 1,
            Stage::KvFilter { .. } => 2,
            Stage::Rename { .. }
            | Stage::Flatten { .. }
            | Stage::EnsureTimestamp { .. }
            | Stage::RedactPii { .. }
            | Stage::Passthrough => 3,
        }
    }
}

/// Reorders `stages` into parsers < enrichment < filters < transforms while
/// preserving relative order within each class (stable sort), so that a
/// pipeline spec submitted with stages in any order always executes in the
/// invariant order spec.md §3 requires.
pub fn normalize_stage_order(stages: &mut [Stage]) {
    stages.sort_by_key(Stage::rank);
}

/// Where to read an event's IP address from, per spec.md §4.4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpSource {
    FirstIpv4,
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub name: String,
    pub description: String,
    pub stages: Vec<Stage>,
    pub ip_source: IpSource,
}

impl Pipeline {
    /// Construct a pipeline with its stages normalised to the invariant
    /// order, the way the engine façade does on every create/update.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        mut stages: Vec<Stage>,
        ip_source: IpSource,
    ) -> Self {
        normalize_stage_order(&mut stages);
        Self {
            id: PipelineId::new(),
            name: name.into(),
            description: description.into(),
            stages,
            ip_source,
        }
    }
}

/// A routing rule: `filter` is a regex applied against the raw message
/// (empty string or literal `"true"` always matches), `final` stops
/// evaluation of subsequent routes (spec.md §4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub name: String,
    pub filter: String,
    pub pipeline_id: PipelineId,
    pub destination_ids: Vec<DestinationId>,
    pub is_final: bool,
    /// Definition order among sibling routes; used to break ties when
    /// resolving the default route by name.
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationType {
    Sentinel,
    S3,
    AzureDataLake,
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub max_failures: u32,
    /// Milliseconds the breaker stays open before permitting a probe.
    /// Sub-second values are required to express spec.md §8 S5's
    /// `open_timeout=100ms` literal scenario.
    pub open_timeout_ms: u64,
    pub successes_to_close: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            open_timeout_ms: 30_000,
            successes_to_close: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub max_events: usize,
    pub max_bytes: usize,
    pub flush_interval_ms: u64,
    pub max_inflight: usize,
    /// Per-write retry budget, exhausted with exponential backoff and jitter
    /// before falling back to dead-letter / spill / drop (spec.md §4.8).
    pub retry_attempts: u32,
    pub gzip: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_events: 500,
            max_bytes: 1_000_000,
            flush_interval_ms: 5_000,
            max_inflight: 4,
            retry_attempts: 3,
            gzip: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelConfig {
    pub workspace_id: String,
    pub shared_key: String,
    pub log_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Supports `${yyyy}`, `${MM}`, `${dd}`, `${HH}` templating.
    pub key_prefix_template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzureDataLakeConfig {
    pub account: String,
    pub filesystem: String,
    pub path_template: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationStatus {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
    Draining,
    Released,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub id: DestinationId,
    pub name: String,
    pub destination_type: DestinationType,
    pub enabled: bool,
    pub batch: BatchConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub spill_dir: Option<String>,
    pub spill_max_bytes: u64,
    /// Time-templated path for terminal dead-letter writes after retry
    /// exhaustion with no spill configured, or spill itself unavailable.
    pub dead_letter_path: Option<String>,
    pub shutdown_grace_ms: u64,
    pub sentinel: Option<SentinelConfig>,
    pub s3: Option<S3Config>,
    pub azure_data_lake: Option<AzureDataLakeConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_as_their_uuid() {
        let id = SourceId::new();
        assert_eq!(id.to_string(), id.0.to_string());
    }

    #[test]
    fn ids_round_trip_through_json() {
        let id = PipelineId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: PipelineId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn stage_order_normalizes_regardless_of_input_order() {
        let mut stages = vec![
            Stage::RedactPii { token: "[REDACTED]".to_string(), typed_tokens: false },
            Stage::KvFilter { field: "severity".to_string(), values: vec!["high".to_string()], exclude: false },
            Stage::GeoipEnrich,
            Stage::ParseVersaKvp { mode: ParseMode::Lenient },
        ];
        normalize_stage_order(&mut stages);
        assert!(matches!(stages[0], Stage::ParseVersaKvp { .. }));
        assert!(matches!(stages[1], Stage::GeoipEnrich));
        assert!(matches!(stages[2], Stage::KvFilter { .. }));
        assert!(matches!(stages[3], Stage::RedactPii { .. }));
    }
}
