//! # mapweave
//!
//! A single-host MapReduce engine: a client that spreads a logical dataset
//! over a fixed pool of workers and applies map, filter, flatmap and reduce
//! transformations, shuffles records by key, merges datasets, and collects
//! results back.
//!
//! ## Architecture
//!
//! - **Engine**: the orchestrator. Owns the dataset-name registry, broadcasts
//!   commands, and waits on an idle barrier so only one command is ever in
//!   flight.
//! - **Workers**: one tokio task per pool slot, each owning a private store of
//!   named partitions and executing commands one at a time.
//! - **Channels**: per-worker control channel and bulk ingest queue, plus one
//!   global result queue shared by all workers.
//! - **Dataset**: a named handle forwarding every operation to the engine.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mapweave::{Engine, EngineConfig};
//!
//! # async fn example() -> Result<(), mapweave::EngineError> {
//! let engine = Engine::start(EngineConfig::new(4).with_batch_size(64))?;
//! let words = engine
//!   .distribute("words", vec!["a".to_string(), "b".to_string(), "a".to_string()])
//!   .await?;
//! let counts = words
//!   .map(|w| (w.clone(), 1u64), false)
//!   .await?
//!   .reduce2(|a, b| a + b, true)
//!   .await?;
//! let mut result = counts.collect(true).await?;
//! result.sort();
//! assert_eq!(result, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
//! engine.terminate().await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

/// Fixed-size chunking of finite sequences.
pub mod batch;
/// Engine configuration.
pub mod config;
/// Named dataset handles.
pub mod dataset;
/// The orchestrator.
pub mod engine;
/// Error types.
pub mod error;
/// Deterministic key-to-worker hashing.
pub mod partitioner;

mod channel;
mod command;
mod ops;
mod record;
mod registry;
mod transfer;
mod worker;

pub use config::{EngineConfig, RetryPolicy};
pub use dataset::Dataset;
pub use engine::Engine;
pub use error::{ConfigError, EngineError, WorkerError};
pub use partitioner::{PartitionKey, hash_string, worker_index};
pub use record::Record;

#[cfg(test)]
mod partitioner_test;
#[cfg(test)]
mod worker_test;
