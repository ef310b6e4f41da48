//! # steamline: Distributed Analytics over Game and Review Streams
//!
//! This crate provides the worker runtime for a sharded analytics pipeline.
//! Every node runs the same binary and is specialized entirely through
//! configuration: which queues it consumes, which stage logic it applies,
//! and which sharded destinations it publishes to.
//!
//! ## Key Features
//!
//! - **Exactly-Once Processing**: Per-producer monotonic sequence numbers with
//!   a duplicate filter on every consumer
//! - **Crash Recovery**: A durable append-only log replayed through the live
//!   processing path on startup
//! - **Distributed Termination**: Counted EOF fan-in for aggregation roots and
//!   a visited-set protocol for peer groups
//! - **Deterministic Sharding**: xxHash32-based routing so replicas always
//!   agree on message placement
//! - **Configuration-Driven**: One binary, many stages; topology comes from
//!   TOML plus environment overrides
//!
//! ## Pipeline Shape
//!
//! ```text
//!                     ┌──────────────┐
//!   games ──────────▶ │ genre/date   │──┐
//!                     │ filters      │  │   ┌────────┐   ┌───────────────┐
//!                     └──────────────┘  ├──▶│ joiner │──▶│ counter / topN │──▶ results
//!                     ┌──────────────┐  │   └────────┘   └───────────────┘
//!   reviews ────────▶ │ score/lang   │──┘
//!                     │ filters      │
//!                     └──────────────┘
//! ```
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use steamline::config::WorkerConfig;
//! use steamline::messaging::rabbit::RabbitBroker;
//! use steamline::worker::Worker;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = WorkerConfig::load()?;
//!     steamline::logging::init_logging(&config.log_level);
//!
//!     let broker = RabbitBroker::connect(&config.broker).await?;
//!     let worker = Worker::new(&config, Arc::new(broker))?;
//!     worker.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dedup;
pub mod error;
pub mod heap;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod recovery;
pub mod sequence;
pub mod sharding;
pub mod stages;
pub mod worker;

pub use config::{StageConfig, StageKind, WorkerConfig};
pub use dedup::DuplicateFilter;
pub use error::{WorkerError, WorkerResult};
pub use messaging::broker::MessageBroker;
pub use messaging::header::{Header, MessageKind, OriginStage};
pub use sequence::{SequenceDestination, SequenceGenerator};
pub use worker::Worker;
