//! Commands broadcast from the orchestrator to workers, and the replies
//! workers send back over their control channel.

use crate::error::WorkerError;
use crate::record::Partition;
use crate::transfer::QueueSender;
use std::fmt;
use std::sync::Arc;

/// Derives a new partition from an existing one.
pub(crate) type Transform =
  Arc<dyn Fn(&dyn Partition) -> Result<Box<dyn Partition>, WorkerError> + Send + Sync>;

/// Consumes a partition and routes its records into the given ingest queues
/// in batches of at most `batch_size`. Returns the number of records sent.
pub(crate) type Router = Arc<
  dyn Fn(Box<dyn Partition>, &[QueueSender], usize) -> Result<usize, WorkerError> + Send + Sync,
>;

/// Constructor for an empty partition of the dataset's record type.
pub(crate) type EmptyPartition = fn() -> Box<dyn Partition>;

/// Rejects a partition that does not hold the expected record type.
pub(crate) type TypeCheck = fn(&dyn Partition) -> Result<(), WorkerError>;

/// Record-level transformation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
  Map,
  FlatMap,
  Filter,
  Reduce,
}

impl Action {
  pub(crate) fn as_str(self) -> &'static str {
    match self {
      Action::Map => "map",
      Action::FlatMap => "flatmap",
      Action::Filter => "filter",
      Action::Reduce => "reduce",
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A unit of work for every worker in the pool.
#[derive(Clone)]
pub(crate) enum Command {
  /// Drain the ingest queue into `name`, waiting for `producers` done-markers.
  AddDataset {
    name: String,
    producers: usize,
    empty: EmptyPartition,
  },
  /// Replace or create `dest` with `transform` applied to `src`.
  Apply {
    action: Action,
    src: String,
    dest: String,
    transform: Transform,
  },
  /// Remove `name` locally and shuffle its records to their owning workers.
  Partition { name: String, router: Router },
  /// Concatenate `srcs` in order into `dest`.
  Merge { srcs: Vec<String>, dest: String },
  Copy { src: String, dest: String },
  /// Delete `name`; it must exist.
  Remove { name: String },
  /// Delete `name` if present. Used to roll back a failed command.
  Discard { name: String },
  /// Reply with the local partition length.
  Count { name: String },
  /// Push the partition to the global queue, removing it when `take` is set
  /// and `check` accepts it.
  Collect {
    name: String,
    take: bool,
    check: TypeCheck,
  },
  Terminate,
}

impl Command {
  /// Action tag, for logs and error reports.
  pub(crate) fn action(&self) -> &'static str {
    match self {
      Command::AddDataset { .. } => "add_dataset",
      Command::Apply { action, .. } => action.as_str(),
      Command::Partition { .. } => "partition",
      Command::Merge { .. } => "merge",
      Command::Copy { .. } => "copy",
      Command::Remove { .. } => "remove_dataset",
      Command::Discard { .. } => "discard",
      Command::Count { .. } => "count",
      Command::Collect { .. } => "collect",
      Command::Terminate => "terminate",
    }
  }
}

impl fmt::Debug for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Command::AddDataset {
        name, producers, ..
      } => f
        .debug_struct("AddDataset")
        .field("name", name)
        .field("producers", producers)
        .finish(),
      Command::Apply {
        action, src, dest, ..
      } => f
        .debug_struct("Apply")
        .field("action", action)
        .field("src", src)
        .field("dest", dest)
        .finish(),
      Command::Partition { name, .. } => f.debug_struct("Partition").field("name", name).finish(),
      Command::Merge { srcs, dest } => f
        .debug_struct("Merge")
        .field("srcs", srcs)
        .field("dest", dest)
        .finish(),
      Command::Copy { src, dest } => f
        .debug_struct("Copy")
        .field("src", src)
        .field("dest", dest)
        .finish(),
      Command::Remove { name } => f.debug_struct("Remove").field("name", name).finish(),
      Command::Discard { name } => f.debug_struct("Discard").field("name", name).finish(),
      Command::Count { name } => f.debug_struct("Count").field("name", name).finish(),
      Command::Collect { name, take, .. } => f
        .debug_struct("Collect")
        .field("name", name)
        .field("take", take)
        .finish(),
      Command::Terminate => f.write_str("Terminate"),
    }
  }
}

/// Worker to orchestrator message on the control channel.
#[derive(Debug)]
pub(crate) enum Reply {
  /// Local partition length, answering [`Command::Count`].
  Count(usize),
  /// The last command failed on this worker.
  Failed(WorkerError),
}
