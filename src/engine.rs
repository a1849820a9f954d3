//! Engine façade (spec.md §4.10, §6, C10): the crate's single public entry
//! point. Owns every registry (sources, pipelines, routes, destinations),
//! the `LogHub`, the filter cache, and the shared collaborators (metrics
//! sink, geo/ASN lookups, clock). Everything else in this crate is a
//! private implementation detail reached only through `Engine`.
//!
//! Registry mutations (`create_*`/`update_*`/`delete_*`) take the engine's
//! write lock; [`Engine::process_batch`], the hot path, takes the read lock
//! only long enough to snapshot routes/pipelines/destinations and then runs
//! lock-free, per spec.md §4.10's concurrency invariants.

use crate::clock::{Clock, SystemClock};
use crate::destinations::worker::DestinationWorker;
use crate::destinations::build_worker;
use crate::enrichment::{AsnLookup, GeoIpLookup};
use crate::error::{ConfigError, EngineError};
use crate::event::Event;
use crate::filter_cache::FilterCache;
use crate::hub::LogHub;
use crate::metrics::MetricsSink;
use crate::model::{
    normalize_stage_order, BufferConfig, Destination, DestinationId, DestinationStatus, Pipeline,
    PipelineId, Route, RouteId, Source, SourceId, SourceStatus, SourceType, Stage,
};
use crate::routing;
use crate::sources::{akamai, syslog, synthetic, IngestSink, SourceAdapter};
use crate::stages::{StageContext, StageExecutor};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Everything the engine needs from the outside world, supplied once at
/// construction per the dependency-injection design note in spec.md §9:
/// no process-wide singletons for the hub, metrics, geo/ASN lookups, or
/// clock.
pub struct EngineConfig {
    pub metrics: Arc<dyn MetricsSink>,
    pub clock: Arc<dyn Clock>,
    pub geo_lookup: Option<Arc<dyn GeoIpLookup>>,
    pub asn_lookup: Option<Arc<dyn AsnLookup>>,
    pub http_client: reqwest::Client,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metrics: Arc::new(crate::metrics::LoggingMetricsSink),
            clock: Arc::new(SystemClock),
            geo_lookup: None,
            asn_lookup: None,
            http_client: reqwest::Client::new(),
        }
    }
}

struct RunningSource {
    adapter: Arc<dyn SourceAdapter>,
}

/// The in-memory registries, guarded by one `RwLock` per spec.md §4.10:
/// CRUD takes the write lock, `process_batch` only reads a snapshot.
#[derive(Default)]
struct Registries {
    sources: HashMap<SourceId, Source>,
    pipelines: HashMap<PipelineId, Pipeline>,
    routes: HashMap<RouteId, Route>,
    destinations: HashMap<DestinationId, Destination>,
}

/// The runtime pipeline engine (spec.md §2 C10). Consumed by the (external,
/// out-of-scope) HTTP control plane through the methods below.
pub struct Engine {
    registries: RwLock<Registries>,
    running_sources: RwLock<HashMap<SourceId, RunningSource>>,
    destination_workers: RwLock<HashMap<DestinationId, Arc<DestinationWorker>>>,
    hub: Arc<LogHub>,
    filter_cache: Arc<FilterCache>,
    executor: StageExecutor,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    geo_lookup: Option<Arc<dyn GeoIpLookup>>,
    asn_lookup: Option<Arc<dyn AsnLookup>>,
    http_client: reqwest::Client,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            registries: RwLock::new(Registries::default()),
            running_sources: RwLock::new(HashMap::new()),
            destination_workers: RwLock::new(HashMap::new()),
            hub: LogHub::shared(),
            filter_cache: FilterCache::shared(),
            executor: StageExecutor::new(),
            metrics: config.metrics,
            clock: config.clock,
            geo_lookup: config.geo_lookup,
            asn_lookup: config.asn_lookup,
            http_client: config.http_client,
        })
    }

    pub fn hub(&self) -> Arc<LogHub> {
        self.hub.clone()
    }

    // ---- Source CRUD -----------------------------------------------------

    pub fn create_source(&self, name: impl Into<String>, source_type: SourceType, buffer: BufferConfig) -> Source {
        let source = Source {
            id: SourceId::new(),
            name: name.into(),
            source_type,
            buffer,
            syslog_tls: None,
            synthetic: None,
            akamai: None,
            status: SourceStatus::Stopped,
            enabled: true,
            last_seen_unix: 0,
            produced_count: 0,
        };
        self.hub.register_source(source.id, source.buffer.capacity);
        self.registries.write().unwrap_or_else(std::sync::PoisonError::into_inner).sources.insert(source.id, source.clone());
        source
    }

    pub fn update_source(&self, source: Source) -> Result<(), EngineError> {
        let mut registries = self.registries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !registries.sources.contains_key(&source.id) {
            return Err(ConfigError::UnknownSource(source.id).into());
        }
        registries.sources.insert(source.id, source);
        Ok(())
    }

    pub async fn delete_source(&self, id: SourceId) -> Result<(), EngineError> {
        // Stopping drains the listener before the registry entry disappears,
        // per spec.md §3 "Stopping a source cancels its listener...".
        let _ = self.stop_source_inner(id).await;
        let mut registries = self.registries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        registries
            .sources
            .remove(&id)
            .ok_or(ConfigError::UnknownSource(id))?;
        self.hub.unregister_source(id);
        Ok(())
    }

    pub fn get_source(&self, id: SourceId) -> Option<Source> {
        self.registries.read().unwrap_or_else(std::sync::PoisonError::into_inner).sources.get(&id).cloned()
    }

    pub fn list_sources(&self) -> Vec<Source> {
        self.registries.read().unwrap_or_else(std::sync::PoisonError::into_inner).sources.values().cloned().collect()
    }

    /// Start a source's adapter. Adapter failures (bind, TLS load, missing
    /// credential) set the source's status to `Failed` and are returned to
    /// the caller, per spec.md §4.9/§7.
    pub async fn start_source(self: &Arc<Self>, id: SourceId) -> Result<(), EngineError> {
        let source = self.get_source(id).ok_or(ConfigError::UnknownSource(id))?;
        {
            let running = self.running_sources.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            if running.contains_key(&id) {
                return Err(crate::error::AdapterError::AlreadyRunning.into());
            }
        }
        self.set_source_status(id, SourceStatus::Starting);
        let sink: Arc<dyn IngestSink> = self.clone();
        let adapter_result = self.build_adapter(&source);
        let adapter = match adapter_result {
            Ok(a) => a,
            Err(err) => {
                self.set_source_status(id, SourceStatus::Failed);
                return Err(err.into());
            }
        };
        match adapter.start(sink).await {
            Ok(()) => {
                self.running_sources
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .insert(id, RunningSource { adapter: adapter.clone() });
                self.set_source_status(id, SourceStatus::Running);
                Ok(())
            }
            Err(err) => {
                self.set_source_status(id, SourceStatus::Failed);
                Err(err.into())
            }
        }
    }

    pub async fn stop_source(&self, id: SourceId) -> Result<(), EngineError> {
        self.stop_source_inner(id).await
    }

    async fn stop_source_inner(&self, id: SourceId) -> Result<(), EngineError> {
        let running = self.running_sources.write().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&id);
        let Some(running) = running else {
            return Ok(());
        };
        running.adapter.stop().await?;
        self.set_source_status(id, SourceStatus::Stopped);
        Ok(())
    }

    fn set_source_status(&self, id: SourceId, status: SourceStatus) {
        if let Some(source) = self.registries.write().unwrap_or_else(std::sync::PoisonError::into_inner).sources.get_mut(&id) {
            source.status = status;
        }
    }

    fn build_adapter(&self, source: &Source) -> Result<Arc<dyn SourceAdapter>, crate::error::AdapterError> {
        match source.source_type {
            SourceType::SyslogTls => {
                let config = source.syslog_tls.clone().ok_or_else(|| {
                    crate::error::AdapterError::CredentialMissing("syslog_tls config missing".to_string())
                })?;
                Ok(Arc::new(syslog::SyslogTlsAdapter::new(source.id, config)))
            }
            SourceType::Synthetic => {
                let config = source.synthetic.clone().ok_or_else(|| {
                    crate::error::AdapterError::CredentialMissing("synthetic config missing".to_string())
                })?;
                Ok(Arc::new(synthetic::SyntheticAdapter::new(source.id, config, self.clock.clone())))
            }
            SourceType::AkamaiDatastream2 => {
                let config = source.akamai.clone().ok_or_else(|| {
                    crate::error::AdapterError::CredentialMissing("akamai config missing".to_string())
                })?;
                Ok(Arc::new(akamai::AkamaiAdapter::new(
                    source.id,
                    config,
                    Arc::new(akamai::HttpStreamClient::new(self.http_client.clone())),
                )))
            }
        }
    }

    // ---- Pipeline CRUD -----------------------------------------------------

    pub fn create_pipeline(&self, name: impl Into<String>, description: impl Into<String>, stages: Vec<Stage>, ip_source: crate::model::IpSource) -> Pipeline {
        let pipeline = Pipeline::new(name, description, stages, ip_source);
        self.registries.write().unwrap_or_else(std::sync::PoisonError::into_inner).pipelines.insert(pipeline.id, pipeline.clone());
        pipeline
    }

    pub fn update_pipeline(&self, mut pipeline: Pipeline) -> Result<(), EngineError> {
        normalize_stage_order(&mut pipeline.stages);
        let mut registries = self.registries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !registries.pipelines.contains_key(&pipeline.id) {
            return Err(ConfigError::UnknownPipeline(pipeline.id).into());
        }
        registries.pipelines.insert(pipeline.id, pipeline);
        Ok(())
    }

    pub fn delete_pipeline(&self, id: PipelineId) -> Result<(), EngineError> {
        self.registries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pipelines
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ConfigError::UnknownPipeline(id).into())
    }

    pub fn get_pipeline(&self, id: PipelineId) -> Option<Pipeline> {
        self.registries.read().unwrap_or_else(std::sync::PoisonError::into_inner).pipelines.get(&id).cloned()
    }

    // ---- Route CRUD -----------------------------------------------------

    pub fn create_route(
        &self,
        name: impl Into<String>,
        filter: impl Into<String>,
        pipeline_id: PipelineId,
        destination_ids: Vec<DestinationId>,
        is_final: bool,
    ) -> Result<Route, EngineError> {
        let filter = filter.into();
        let mut registries = self.registries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !registries.pipelines.contains_key(&pipeline_id) {
            return Err(ConfigError::UnknownPipeline(pipeline_id).into());
        }
        for dest_id in &destination_ids {
            if !registries.destinations.contains_key(dest_id) {
                return Err(ConfigError::UnknownDestination(*dest_id).into());
            }
        }
        if let Some(message) = self.filter_cache.compile_error(&filter) {
            return Err(ConfigError::InvalidFilter { pattern: filter, message }.into());
        }
        let order = registries.routes.len() as u32;
        let route = Route {
            id: RouteId::new(),
            name: name.into(),
            filter,
            pipeline_id,
            destination_ids,
            is_final,
            order,
        };
        registries.routes.insert(route.id, route.clone());
        Ok(route)
    }

    pub fn update_route(&self, route: Route) -> Result<(), EngineError> {
        let mut registries = self.registries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !registries.routes.contains_key(&route.id) {
            return Err(ConfigError::UnknownRoute(route.id).into());
        }
        if !registries.pipelines.contains_key(&route.pipeline_id) {
            return Err(ConfigError::UnknownPipeline(route.pipeline_id).into());
        }
        registries.routes.insert(route.id, route);
        Ok(())
    }

    pub fn delete_route(&self, id: RouteId) -> Result<(), EngineError> {
        self.registries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .routes
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ConfigError::UnknownRoute(id).into())
    }

    pub fn list_routes(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self.registries.read().unwrap_or_else(std::sync::PoisonError::into_inner).routes.values().cloned().collect();
        routes.sort_by_key(|r| r.order);
        routes
    }

    // ---- Destination CRUD -----------------------------------------------------

    pub fn create_destination(&self, destination: Destination) -> Result<Destination, EngineError> {
        let worker = build_worker(&destination, self.http_client.clone(), self.metrics.clone(), self.clock.clone())?;
        self.spawn_worker_tasks(&worker);
        self.destination_workers.write().unwrap_or_else(std::sync::PoisonError::into_inner).insert(destination.id, worker);
        self.registries.write().unwrap_or_else(std::sync::PoisonError::into_inner).destinations.insert(destination.id, destination.clone());
        Ok(destination)
    }

    /// Partial update per spec.md §9 "config patch semantics": nested
    /// `config` bags replace wholesale, everything else merges field by
    /// field. Rebuilds the destination's worker so a changed circuit
    /// breaker/batch/driver config takes effect immediately.
    pub fn patch_destination(&self, id: DestinationId, patch: DestinationPatch) -> Result<Destination, EngineError> {
        let mut registries = self.registries.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let destination = registries
            .destinations
            .get_mut(&id)
            .ok_or(ConfigError::UnknownDestination(id))?;
        patch.apply(destination);
        let destination = destination.clone();
        drop(registries);

        let worker = build_worker(&destination, self.http_client.clone(), self.metrics.clone(), self.clock.clone())?;
        self.spawn_worker_tasks(&worker);
        self.destination_workers.write().unwrap_or_else(std::sync::PoisonError::into_inner).insert(id, worker);
        Ok(destination)
    }

    pub async fn delete_destination(&self, id: DestinationId) -> Result<(), EngineError> {
        let worker = self.destination_workers.write().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&id);
        if let Some(worker) = worker {
            // draining -> released: flush or spill the pending batch within
            // shutdown_grace before the registry entry disappears (spec.md §3).
            worker.drain().await;
        }
        self.registries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .destinations
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ConfigError::UnknownDestination(id).into())
    }

    pub fn get_destination(&self, id: DestinationId) -> Option<Destination> {
        self.registries.read().unwrap_or_else(std::sync::PoisonError::into_inner).destinations.get(&id).cloned()
    }

    pub async fn destination_status(&self, id: DestinationId) -> Option<DestinationStatus> {
        let worker = self.destination_workers.read().unwrap_or_else(std::sync::PoisonError::into_inner).get(&id).cloned()?;
        Some(worker.status().await)
    }

    fn spawn_worker_tasks(&self, worker: &Arc<DestinationWorker>) {
        tokio::spawn(worker.clone().run_flush_timer());
        tokio::spawn(worker.clone().run_spill_replay());
    }

    // ---- Buffer query / config -----------------------------------------------------

    pub fn get_buffer(&self, id: SourceId) -> Option<BufferSnapshot> {
        let rb = self.hub.ring_buffer(id)?;
        Some(BufferSnapshot {
            source_id: id,
            capacity: rb.capacity(),
            total_written: rb.total_written(),
            dropped: rb.dropped(),
        })
    }

    pub fn get_buffers(&self) -> Vec<BufferSnapshot> {
        self.list_sources()
            .into_iter()
            .filter_map(|s| self.get_buffer(s.id))
            .collect()
    }

    /// Widen or shrink a source's ring buffer by re-registering it at the
    /// hub with a new capacity; existing tail history for that source is
    /// discarded (the ring is reallocated), matching the hub's
    /// create-on-first-use semantics (spec.md §4.2).
    pub fn update_buffer_config(&self, id: SourceId, capacity: usize) -> Result<(), EngineError> {
        if !self.registries.read().unwrap_or_else(std::sync::PoisonError::into_inner).sources.contains_key(&id) {
            return Err(ConfigError::UnknownSource(id).into());
        }
        self.hub.unregister_source(id);
        self.hub.register_source(id, capacity);
        if let Some(source) = self.registries.write().unwrap_or_else(std::sync::PoisonError::into_inner).sources.get_mut(&id) {
            source.buffer.capacity = capacity;
        }
        Ok(())
    }

    pub fn reset_buffer(&self, id: SourceId) -> Result<(), EngineError> {
        let capacity = self
            .get_buffer(id)
            .map(|b| b.capacity)
            .ok_or(ConfigError::UnknownSource(id))?;
        self.hub.unregister_source(id);
        self.hub.register_source(id, capacity);
        Ok(())
    }

    // ---- Hot path -----------------------------------------------------

    /// `processBatch` (spec.md §4.10): the hot entrypoint invoked by every
    /// source adapter. Snapshots routes/pipelines/destinations under the
    /// read lock, then runs every message through route matching, the
    /// stage executor and destination dispatch without holding any lock.
    pub async fn process_batch(&self, source_id: SourceId, messages: Vec<String>) {
        if messages.is_empty() {
            return;
        }
        let started = self.clock.monotonic_now();
        let snapshot = {
            let registries = self.registries.read().unwrap_or_else(std::sync::PoisonError::into_inner);
            Snapshot {
                routes: {
                    let mut r: Vec<Route> = registries.routes.values().cloned().collect();
                    r.sort_by_key(|route| route.order);
                    r
                },
                pipelines: registries.pipelines.clone(),
                destinations: registries.destinations.keys().copied().collect(),
                source_name: registries.sources.get(&source_id).map(|s| s.name.clone()),
            }
        };
        let default_route = routing::resolve_default_route(&snapshot.routes).cloned();
        let source_label = snapshot.source_name.clone().unwrap_or_else(|| source_id.to_string());
        let batch_len = messages.len();

        for raw in messages {
            self.process_one(source_id, &source_label, raw, &snapshot, default_route.as_ref()).await;
        }

        let elapsed = self.clock.monotonic_now().saturating_duration_since(started);
        let per_event = elapsed.as_secs_f64() / batch_len.max(1) as f64;
        self.metrics
            .observe_pipeline_latency("batch", "all", &source_label, per_event);

        // Bookkeeping only, once per batch rather than per event: cheap
        // enough that taking the write lock here doesn't threaten the
        // lock-free hot path the per-event loop above relies on.
        if let Some(source) = self.registries.write().unwrap_or_else(std::sync::PoisonError::into_inner).sources.get_mut(&source_id) {
            source.last_seen_unix = self.clock.now().timestamp();
            source.produced_count += batch_len as u64;
        }
    }

    async fn process_one(
        &self,
        source_id: SourceId,
        source_label: &str,
        raw: String,
        snapshot: &Snapshot,
        default_route: Option<&Route>,
    ) {
        let event = Event::from_raw(raw);
        let matched = routing::matching_routes(&snapshot.routes, event.raw(), &self.filter_cache);
        let routes: Vec<&Route> = if matched.is_empty() {
            default_route.into_iter().collect()
        } else {
            matched
        };

        if routes.is_empty() {
            // No route, not even a default: nothing claims the event. This
            // counts as a drop for metrics purposes, matching spec.md §4.10
            // "emit metrics: per (source, route, destination) event counter".
            self.metrics.incr_events_dropped(source_label, 1);
            return;
        }

        for route in routes {
            let Some(pipeline) = snapshot.pipelines.get(&route.pipeline_id) else {
                warn!(route = %route.name, "route references unknown pipeline, dropping clone");
                continue;
            };
            let mut clone = event.clone();
            let ctx = StageContext {
                clock: self.clock.as_ref(),
                geo_lookup: self.geo_lookup.as_deref(),
                asn_lookup: self.asn_lookup.as_deref(),
            };
            let dropped = self.executor.execute(&mut clone, pipeline, &ctx);

            // Live tail always sees the event, dropped or not, matching
            // spec.md §4.10 step (e) running before (f).
            self.hub.publish(source_id, clone.clone());

            if dropped {
                self.metrics.incr_events_dropped(source_label, 1);
                continue;
            }

            for dest_id in &route.destination_ids {
                if !snapshot.destinations.contains(dest_id) {
                    continue;
                }
                let worker = self.destination_workers.read().unwrap_or_else(std::sync::PoisonError::into_inner).get(dest_id).cloned();
                if let Some(worker) = worker {
                    worker.write_event(clone.clone()).await;
                    self.metrics.incr_ingest_events(source_label, &route.name, &dest_id.to_string(), 1);
                } else {
                    self.metrics.incr_events_dropped(source_label, 1);
                }
            }
        }
    }

    // ---- Capture -----------------------------------------------------

    pub async fn start_capture(
        &self,
        source_id: SourceId,
        format: crate::hub::CaptureFormat,
        library_dir: &std::path::Path,
        name: &str,
    ) -> std::io::Result<(crate::model::CaptureId, std::path::PathBuf)> {
        let capture_id = crate::model::CaptureId::new();
        let unix = self.clock.now().timestamp();
        let ext = match format {
            crate::hub::CaptureFormat::Log => "log",
            crate::hub::CaptureFormat::Json => "json",
        };
        let path = library_dir.join(format!("{name}-{unix}.{ext}"));
        self.hub.start_capture(source_id, capture_id, path.clone(), format).await?;
        info!(source = %source_id, path = %path.display(), "capture started");
        Ok((capture_id, path))
    }
}

#[async_trait]
impl IngestSink for Engine {
    /// The narrow interface source adapters are given — they hold only
    /// `Arc<dyn IngestSink>`, never the engine aggregate itself (spec.md §9
    /// cyclic-reference note).
    async fn ingest(&self, source_id: SourceId, messages: Vec<String>) {
        self.process_batch(source_id, messages).await;
    }
}

struct Snapshot {
    routes: Vec<Route>,
    pipelines: HashMap<PipelineId, Pipeline>,
    destinations: std::collections::HashSet<DestinationId>,
    source_name: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferSnapshot {
    pub source_id: SourceId,
    pub capacity: usize,
    pub total_written: u64,
    pub dropped: u64,
}

/// Top-level merge, nested config bags replace wholesale (spec.md §9).
#[derive(Debug, Clone, Default)]
pub struct DestinationPatch {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub batch: Option<crate::model::BatchConfig>,
    pub circuit_breaker: Option<crate::model::CircuitBreakerConfig>,
    pub spill_dir: Option<Option<String>>,
    pub dead_letter_path: Option<Option<String>>,
    pub sentinel: Option<Option<crate::model::SentinelConfig>>,
    pub s3: Option<Option<crate::model::S3Config>>,
    pub azure_data_lake: Option<Option<crate::model::AzureDataLakeConfig>>,
}

impl DestinationPatch {
    fn apply(self, destination: &mut Destination) {
        if let Some(name) = self.name {
            destination.name = name;
        }
        if let Some(enabled) = self.enabled {
            destination.enabled = enabled;
        }
        if let Some(batch) = self.batch {
            destination.batch = batch;
        }
        if let Some(cb) = self.circuit_breaker {
            destination.circuit_breaker = cb;
        }
        if let Some(spill_dir) = self.spill_dir {
            destination.spill_dir = spill_dir;
        }
        if let Some(dlp) = self.dead_letter_path {
            destination.dead_letter_path = dlp;
        }
        if let Some(sentinel) = self.sentinel {
            destination.sentinel = sentinel;
        }
        if let Some(s3) = self.s3 {
            destination.s3 = s3;
        }
        if let Some(adl) = self.azure_data_lake {
            destination.azure_data_lake = adl;
        }
    }
}

