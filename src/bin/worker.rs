//! # Steamline Worker
//!
//! Thin wrapper binary for running one pipeline stage as a standalone
//! process. Every node in the pipeline runs this binary; which stage it
//! plays comes entirely from configuration.
//!
//! ## Usage
//!
//! ```bash
//! # Run with the default config.toml
//! cargo run --bin steamline-worker
//!
//! # Run a specific stage definition
//! STEAMLINE_CONFIG=deploy/top_n_1.toml cargo run --bin steamline-worker
//! ```

use std::sync::Arc;

use tracing::info;

use steamline::config::WorkerConfig;
use steamline::logging::init_logging;
use steamline::messaging::rabbit::RabbitBroker;
use steamline::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::load()?;
    init_logging(&config.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        stage = ?config.stage.kind,
        id = config.stage.id,
        uuid = config.stage.uuid,
        "starting steamline worker"
    );

    let broker = RabbitBroker::connect(&config.broker).await?;
    let worker = Worker::new(&config, Arc::new(broker))?;
    worker.run().await?;

    info!("worker stopped");
    Ok(())
}
