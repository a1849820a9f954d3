//! Engine demo: wires a synthetic source through a Versa-KVP pipeline into
//! a null destination, without the (out-of-scope) HTTP control plane.
//!
//! ```bash
//! engine-demo --events-per-second 50 --run-secs 5
//! ```

use bibbl_log_stream_engine::engine::{Engine, EngineConfig};
use bibbl_log_stream_engine::model::{
    BatchConfig, BufferConfig, CircuitBreakerConfig, Destination, DestinationType, IpSource,
    ParseMode, SourceType, Stage, SyntheticConfig,
};
use clap::Parser;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "engine-demo")]
#[command(about = "Run the Bibbl Log Stream engine end to end against a synthetic source")]
struct Args {
    /// Target synthetic events-per-second.
    #[arg(long, default_value_t = 50)]
    events_per_second: u32,

    /// Synthetic generator worker count.
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// How long to run before printing a summary and exiting.
    #[arg(long, default_value_t = 5)]
    run_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let engine = Engine::new(EngineConfig::default());

    let pipeline = engine.create_pipeline(
        "default-versa",
        "Parses Versa KVP, redacts PII, stamps a timestamp",
        vec![
            Stage::ParseVersaKvp { mode: ParseMode::Lenient },
            Stage::EnsureTimestamp { field: "@timestamp".to_string() },
            Stage::RedactPii { token: "[REDACTED]".to_string(), typed_tokens: true },
        ],
        IpSource::FirstIpv4,
    );

    let destination = engine.create_destination(Destination {
        id: bibbl_log_stream_engine::model::DestinationId::new(),
        name: "null-sink".to_string(),
        destination_type: DestinationType::Null,
        enabled: true,
        batch: BatchConfig::default(),
        circuit_breaker: CircuitBreakerConfig::default(),
        spill_dir: None,
        spill_max_bytes: 64 * 1024 * 1024,
        dead_letter_path: None,
        shutdown_grace_ms: 2_000,
        sentinel: None,
        s3: None,
        azure_data_lake: None,
    })?;

    engine.create_route("default", "true", pipeline.id, vec![destination.id], true)?;

    let mut source = engine.create_source(
        "synthetic-1",
        SourceType::Synthetic,
        BufferConfig { capacity: 8192 },
    );
    source.synthetic = Some(SyntheticConfig {
        events_per_second: args.events_per_second,
        worker_count: args.workers,
    });
    engine.update_source(source.clone())?;

    engine.start_source(source.id).await?;
    info!(run_secs = args.run_secs, "engine-demo running");
    tokio::time::sleep(Duration::from_secs(args.run_secs)).await;
    engine.stop_source(source.id).await?;

    if let Some(buffer) = engine.get_buffer(source.id) {
        info!(
            total_written = buffer.total_written,
            dropped = buffer.dropped,
            capacity = buffer.capacity,
            "final ring buffer stats"
        );
    }
    let tail = engine.hub().tail(source.id, 3);
    for event in tail {
        println!("{}", event.to_json());
    }

    Ok(())
}
