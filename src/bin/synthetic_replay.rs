//! Replays a captured log file through the engine one line at a time,
//! useful for validating a pipeline/route/destination configuration against
//! a real capture before wiring it into the (out-of-scope) control plane.
//!
//! ```bash
//! synthetic-replay --file capture.log --parser versa-kvp
//! ```

use bibbl_log_stream_engine::engine::{Engine, EngineConfig};
use bibbl_log_stream_engine::model::{
    BatchConfig, BufferConfig, CircuitBreakerConfig, Destination, DestinationId, DestinationType,
    IpSource, ParseMode, SourceType, Stage,
};
use clap::{Parser, ValueEnum};
use std::io::BufRead;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ParserChoice {
    VersaKvp,
    PaloaltoCsv,
}

#[derive(Parser, Debug)]
#[command(name = "synthetic-replay")]
#[command(about = "Replay a captured log file through the Bibbl Log Stream pipeline engine")]
struct Args {
    /// Path to a newline-delimited log capture. Reads stdin when omitted.
    #[arg(long)]
    file: Option<String>,

    /// Which stage-chain parser to run before a severity filter + redaction.
    #[arg(long, value_enum, default_value_t = ParserChoice::VersaKvp)]
    parser: ParserChoice,

    /// Fail events on the first malformed segment instead of skipping it.
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let engine = Engine::new(EngineConfig::default());

    let mode = if args.strict { ParseMode::Strict } else { ParseMode::Lenient };
    let parse_stage = match args.parser {
        ParserChoice::VersaKvp => Stage::ParseVersaKvp { mode },
        ParserChoice::PaloaltoCsv => Stage::ParsePaloAltoCsv { mode },
    };
    let pipeline = engine.create_pipeline(
        "replay",
        "replay pipeline: parse + ensure timestamp",
        vec![parse_stage, Stage::EnsureTimestamp { field: "@timestamp".to_string() }],
        IpSource::FirstIpv4,
    );

    let destination = engine.create_destination(Destination {
        id: DestinationId::new(),
        name: "replay-sink".to_string(),
        destination_type: DestinationType::Null,
        enabled: true,
        batch: BatchConfig { max_events: 1, ..BatchConfig::default() },
        circuit_breaker: CircuitBreakerConfig::default(),
        spill_dir: None,
        spill_max_bytes: 1024 * 1024,
        dead_letter_path: None,
        shutdown_grace_ms: 1_000,
        sentinel: None,
        s3: None,
        azure_data_lake: None,
    })?;
    engine.create_route("default", "true", pipeline.id, vec![destination.id], true)?;

    let source = engine.create_source("replay-source", SourceType::Synthetic, BufferConfig { capacity: 4096 });

    let lines: Vec<String> = match &args.file {
        Some(path) => std::io::BufReader::new(std::fs::File::open(path)?)
            .lines()
            .collect::<std::io::Result<_>>()?,
        None => std::io::stdin()
            .lock()
            .lines()
            .collect::<std::io::Result<_>>()?,
    };
    let count = lines.len();
    engine.process_batch(source.id, lines).await;

    let buffer = engine.get_buffer(source.id);
    info!(replayed = count, buffer = ?buffer, "replay complete");
    for event in engine.hub().tail(source.id, count.min(5)) {
        println!("{}", event.to_json());
    }

    Ok(())
}
