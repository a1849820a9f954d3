//! Destination workers (spec.md §4.8, C8): one [`worker::DestinationWorker`]
//! per configured [`crate::model::Destination`], built by [`build_worker`]
//! from its driver-specific config plus the shared circuit breaker / spill
//! / batching machinery.

pub mod azure_data_lake;
pub mod circuit_breaker;
pub mod driver;
pub mod null;
pub mod path_template;
pub mod s3;
pub mod sentinel;
pub mod serialize;
pub mod worker;

use self::circuit_breaker::CircuitBreaker;
use self::driver::DestinationDriver;
use crate::clock::Clock;
use crate::error::{ConfigError, SpillError};
use crate::metrics::MetricsSink;
use crate::model::{Destination, DestinationType};
use crate::spill::SpillQueue;
use std::sync::Arc;
use std::time::Duration;
use worker::DestinationWorker;

/// Construct the concrete driver for a destination's configured type.
pub fn build_driver(destination: &Destination, http_client: reqwest::Client) -> Result<Arc<dyn DestinationDriver>, ConfigError> {
    match destination.destination_type {
        DestinationType::Sentinel => {
            let config = destination.sentinel.clone().ok_or_else(|| {
                ConfigError::DestinationConfig(format!("destination {} missing sentinel config", destination.name))
            })?;
            Ok(Arc::new(sentinel::SentinelDriver::new(http_client, config)))
        }
        DestinationType::S3 => {
            let config = destination.s3.clone().ok_or_else(|| {
                ConfigError::DestinationConfig(format!("destination {} missing s3 config", destination.name))
            })?;
            Ok(Arc::new(s3::S3Driver::new(http_client, config)))
        }
        DestinationType::AzureDataLake => {
            let config = destination.azure_data_lake.clone().ok_or_else(|| {
                ConfigError::DestinationConfig(format!("destination {} missing azure_data_lake config", destination.name))
            })?;
            Ok(Arc::new(azure_data_lake::AzureDataLakeDriver::new(http_client, config)))
        }
        DestinationType::Null => Ok(Arc::new(null::NullDriver::new())),
    }
}

/// Build a fully wired worker for `destination`: driver, circuit breaker,
/// optional spill queue opened from `spill_dir`, and the shared metrics
/// sink / clock.
pub fn build_worker(
    destination: &Destination,
    http_client: reqwest::Client,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<DestinationWorker>, ConfigError> {
    let driver = build_driver(destination, http_client)?;
    let breaker = CircuitBreaker::new(destination.circuit_breaker);
    let spill = match &destination.spill_dir {
        Some(dir) => Some(SpillQueue::open(dir, destination.spill_max_bytes).map_err(spill_to_config_error)?),
        None => None,
    };
    Ok(DestinationWorker::new(
        destination.name.clone(),
        driver,
        destination.batch,
        breaker,
        spill,
        destination.dead_letter_path.clone(),
        metrics,
        clock,
        Duration::from_millis(destination.shutdown_grace_ms.max(1)),
    ))
}

fn spill_to_config_error(err: SpillError) -> ConfigError {
    ConfigError::DestinationConfig(format!("spill queue init failed: {err}"))
}
