//! Pool worker.
//!
//! A worker owns a private store of named partitions and executes one command
//! at a time from its control channel. It only speaks when spoken to: a reply
//! for `count` or a failure, batches on the global queue for `collect`, and
//! batches on peers' ingest queues during a shuffle.

use crate::channel::WorkerEndpoints;
use crate::command::{Command, Reply, Router, Transform, TypeCheck};
use crate::config::RetryPolicy;
use crate::error::WorkerError;
use crate::record::{Batch, Partition};
use crate::transfer::{Transfer, drain, mark_done, send_all};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{Instrument, debug, error, info_span, trace, warn};

/// One member of the pool.
pub(crate) struct Worker {
  id: usize,
  store: HashMap<String, Box<dyn Partition>>,
  endpoints: WorkerEndpoints,
  batch_size: usize,
  transfer: RetryPolicy,
}

impl Worker {
  pub(crate) fn new(
    id: usize,
    endpoints: WorkerEndpoints,
    batch_size: usize,
    transfer: RetryPolicy,
  ) -> Self {
    Self {
      id,
      store: HashMap::new(),
      endpoints,
      batch_size,
      transfer,
    }
  }

  /// Command loop. Returns after `Terminate`, or once the orchestrator drops
  /// the control channel.
  pub(crate) async fn run(self) {
    let span = info_span!("worker", id = self.id);
    self.command_loop().instrument(span).await
  }

  async fn command_loop(mut self) {
    debug!("worker started");
    while let Some(command) = self.endpoints.commands.recv().await {
      let action = command.action();
      let terminate = matches!(command, Command::Terminate);
      trace!(?command, "executing");
      // Record clones and drops run outside the user-function guards.
      let result = AssertUnwindSafe(self.execute(command))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(WorkerError::from_panic(action, payload)));
      if let Err(e) = result {
        error!(action, error = %e, "command failed");
        // The orchestrator may already be gone during shutdown.
        let _ = self.endpoints.replies.send(Reply::Failed(e));
      }
      self.endpoints.status.completed();
      if terminate {
        break;
      }
    }
    debug!(datasets = self.store.len(), "worker stopped");
  }

  async fn execute(&mut self, command: Command) -> Result<(), WorkerError> {
    match command {
      Command::AddDataset {
        name,
        producers,
        empty,
      } => self.add_dataset(name, producers, empty).await,
      Command::Apply {
        action,
        src,
        dest,
        transform,
      } => self.apply(action.as_str(), &src, dest, &transform),
      Command::Partition { name, router } => self.partition(&name, &router),
      Command::Merge { srcs, dest } => self.merge(&srcs, dest),
      Command::Copy { src, dest } => {
        let copy = self.get(&src)?.duplicate();
        self.store.insert(dest, copy);
        Ok(())
      }
      Command::Remove { name } => self
        .store
        .remove(&name)
        .map(drop)
        .ok_or(WorkerError::UnknownDataset(name)),
      Command::Discard { name } => {
        self.store.remove(&name);
        Ok(())
      }
      Command::Count { name } => {
        let len = self.get(&name)?.len();
        let _ = self.endpoints.replies.send(Reply::Count(len));
        Ok(())
      }
      Command::Collect { name, take, check } => self.collect(name, take, check),
      Command::Terminate => Ok(()),
    }
  }

  fn get(&self, name: &str) -> Result<&dyn Partition, WorkerError> {
    self
      .store
      .get(name)
      .map(|p| p.as_ref())
      .ok_or_else(|| WorkerError::UnknownDataset(name.to_string()))
  }

  /// Drains the ingest queue into a new partition.
  ///
  /// The queue is drained before any check so that a rejected command leaves
  /// no stale batches behind for the next ingest.
  async fn add_dataset(
    &mut self,
    name: String,
    producers: usize,
    empty: fn() -> Box<dyn Partition>,
  ) -> Result<(), WorkerError> {
    let drained = drain(&mut self.endpoints.ingest, producers, &self.transfer).await;
    if !drained.is_complete() {
      warn!(
        dataset = %name,
        expected = drained.expected,
        finished = drained.finished,
        "ingest ended before every producer finished"
      );
    }
    if self.store.contains_key(&name) {
      return Err(WorkerError::DatasetExists(name));
    }
    let mut partition = empty();
    for batch in drained.batches {
      partition.append_batch(batch)?;
    }
    trace!(dataset = %name, records = partition.len(), "ingested");
    self.store.insert(name, partition);
    Ok(())
  }

  fn apply(
    &mut self,
    operation: &'static str,
    src: &str,
    dest: String,
    transform: &Transform,
  ) -> Result<(), WorkerError> {
    let input = self.get(src)?;
    let output = guarded(operation, || transform(input))?;
    self.store.insert(dest, output);
    Ok(())
  }

  /// Shuffles `name` to its owning workers. Every peer gets a done-marker
  /// from this worker even when routing fails, so no ingest waits on it.
  fn partition(&mut self, name: &str, router: &Router) -> Result<(), WorkerError> {
    let peers = &self.endpoints.peers;
    let result = match self.store.remove(name) {
      Some(partition) => guarded("partition", || router(partition, peers, self.batch_size)),
      None => Err(WorkerError::UnknownDataset(name.to_string())),
    };
    mark_done(peers);
    let sent = result?;
    trace!(dataset = name, sent, "shuffled");
    Ok(())
  }

  fn merge(&mut self, srcs: &[String], dest: String) -> Result<(), WorkerError> {
    let Some((first, rest)) = srcs.split_first() else {
      return Ok(());
    };
    let mut merged = self.get(first)?.duplicate();
    for src in rest {
      merged.extend_from(self.get(src)?)?;
    }
    self.store.insert(dest, merged);
    Ok(())
  }

  /// Pushes the partition to the global queue. The done-marker is sent even
  /// when the command fails, so the collecting side never stalls.
  ///
  /// With `take` set the partition is only removed once `check` accepts its
  /// record type; a rejected partition stays in the store.
  fn collect(&mut self, name: String, take: bool, check: TypeCheck) -> Result<(), WorkerError> {
    let result = self.chunks_for_collect(&name, take, check);
    match result {
      Ok(chunks) => {
        trace!(dataset = %name, batches = chunks.len(), "collecting");
        send_all(&self.endpoints.global, chunks);
        Ok(())
      }
      Err(e) => {
        self.endpoints.global.send(Transfer::Done);
        Err(e)
      }
    }
  }

  fn chunks_for_collect(
    &mut self,
    name: &str,
    take: bool,
    check: TypeCheck,
  ) -> Result<Vec<Batch>, WorkerError> {
    check(self.get(name)?)?;
    let batch_size = self.batch_size;
    if take {
      let Some(partition) = self.store.remove(name) else {
        return Err(WorkerError::UnknownDataset(name.to_string()));
      };
      guarded("collect", || Ok(partition.into_batches(batch_size)))
    } else {
      let partition = self.get(name)?;
      guarded("collect", || Ok(partition.to_batches(batch_size)))
    }
  }
}

/// Runs user code, turning a panic into a [`WorkerError::Panicked`].
fn guarded<R>(
  operation: &'static str,
  f: impl FnOnce() -> Result<R, WorkerError>,
) -> Result<R, WorkerError> {
  catch_unwind(AssertUnwindSafe(f))
    .unwrap_or_else(|payload| Err(WorkerError::from_panic(operation, payload)))
}
