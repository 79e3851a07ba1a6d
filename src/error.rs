//! # Error Handling
//!
//! Errors raised by the engine, split by the layer that detects them:
//!
//! - **ConfigError**: rejected [`EngineConfig`](crate::config::EngineConfig) values
//! - **WorkerError**: failures while a worker executes a command (unknown dataset,
//!   record type mismatch, panicking user function)
//! - **EngineError**: everything the orchestrator reports to callers
//!
//! Registry and pool-state errors are returned synchronously by the call that
//! caused them. Worker errors are asynchronous relative to the broadcast that
//! triggered them and surface at the next barrier, wrapped in
//! [`EngineError::Worker`].

use std::any::Any;

/// Invalid engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
  /// The pool must contain at least one worker.
  #[error("worker count must be at least 1")]
  NoWorkers,

  /// Bulk transfers cannot be chunked into empty batches.
  #[error("batch size must be at least 1")]
  ZeroBatchSize,

  /// The bounded-retry receiver needs at least one empty poll before giving up.
  #[error("transfer retry budget must be at least 1")]
  ZeroRetries,
}

/// Failure while a worker executes a command.
///
/// Workers never retry; the error is reported back over the control channel
/// and the worker keeps serving subsequent commands.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
  /// The command referenced a dataset the worker does not hold.
  #[error("unknown dataset `{0}`")]
  UnknownDataset(String),

  /// `add_dataset` targeted a name that is already occupied.
  #[error("dataset `{0}` already exists")]
  DatasetExists(String),

  /// A partition or batch did not hold the record type the command expected.
  #[error("record type mismatch: expected `{expected}`, found `{found}`")]
  TypeMismatch {
    /// Record type the command was built for.
    expected: &'static str,
    /// Record type actually stored.
    found: &'static str,
  },

  /// A user-supplied function panicked.
  #[error("{operation} panicked: {message}")]
  Panicked {
    /// Command that was executing.
    operation: &'static str,
    /// Panic payload, when it was a string.
    message: String,
  },
}

impl WorkerError {
  /// Builds a [`WorkerError::Panicked`] from a `catch_unwind` payload.
  pub(crate) fn from_panic(operation: &'static str, payload: Box<dyn Any + Send>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "non-string panic payload".to_string()
    };
    WorkerError::Panicked { operation, message }
  }
}

/// Errors reported by the [`Engine`](crate::engine::Engine).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// The configuration was rejected.
  #[error("invalid configuration: {0}")]
  Config(#[from] ConfigError),

  /// The engine must be started from inside a tokio runtime.
  #[error("no tokio runtime available to spawn workers")]
  NoRuntime,

  /// The named dataset is not registered.
  #[error("dataset `{0}` not found")]
  NotFound(String),

  /// `merge` needs at least one source dataset.
  #[error("merge requires at least one dataset")]
  EmptyMerge,

  /// The pool has been terminated and accepts no further commands.
  #[error("worker pool is terminated")]
  Terminated,

  /// A worker's control channel is closed.
  #[error("worker {0} is no longer running")]
  WorkerGone(usize),

  /// A worker failed to execute the previous command.
  #[error("worker {worker} failed: {source}")]
  Worker {
    /// Index of the failing worker.
    worker: usize,
    /// What went wrong.
    #[source]
    source: WorkerError,
  },

  /// The pool did not settle within the configured barrier timeout.
  #[error("worker pool did not become idle within {0:?}")]
  BarrierTimeout(std::time::Duration),

  /// Collected batches did not hold the handle's record type.
  #[error("collected records are not of type `{0}`")]
  TypeMismatch(&'static str),
}

impl EngineError {
  /// The worker-side cause, if this error came from a worker.
  pub fn worker_error(&self) -> Option<&WorkerError> {
    match self {
      EngineError::Worker { source, .. } => Some(source),
      _ => None,
    }
  }
}

/// Convenience alias used throughout the engine.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
