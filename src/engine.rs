//! # Orchestrator
//!
//! [`Engine`] is the single point of coordination for a worker pool. It owns
//! the dataset-name registry and every dispatch endpoint, broadcasts commands,
//! and runs the idle barrier that keeps exactly one command in flight.
//!
//! ## Barrier
//!
//! Before every command the engine waits until all workers are idle and,
//! for data-affecting operations, every bulk queue is empty. Worker failures
//! from the previous command are surfaced at that point as
//! [`EngineError::Worker`]; the destination that command registered is freed
//! and discarded on every worker first, so a failed transform never leaves a
//! half-built dataset behind.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mapweave::{Engine, EngineConfig};
//!
//! # async fn example() -> Result<(), mapweave::EngineError> {
//! let engine = Engine::start(EngineConfig::new(4))?;
//! let nums = engine.distribute("nums", 1..=100u64).await?;
//! let pairs = nums.map(|x| (x % 3, *x), false).await?;
//! let sums = pairs.reduce2(|a, b| a + b, true).await?;
//! let result = sums.collect(true).await?;
//! assert_eq!(result.len(), 3);
//! engine.terminate().await?;
//! # Ok(())
//! # }
//! ```

use crate::channel::{ChannelSet, WorkerChannels};
use crate::command::{Action, Command, Reply, Transform};
use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::error::{EngineError, Result, WorkerError};
use crate::ops::{self, Combiner};
use crate::partitioner::PartitionKey;
use crate::record::{Record, empty_partition, expect_type};
use crate::registry::NameRegistry;
use crate::transfer::{Outbox, QueueReceiver, QueueSender, drain, flatten, mark_done};
use crate::worker::Worker;
use std::any::type_name;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Whether a barrier also waits for the bulk queues to drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueCheck {
  Include,
  Skip,
}

/// Client for a pool of workers.
///
/// Construct with [`Engine::start`] inside a tokio runtime. Every operation
/// takes `&self`; operations from concurrent callers are serialized.
pub struct Engine {
  config: EngineConfig,
  pool: Mutex<Pool>,
}

/// Orchestrator state guarded by the engine lock.
struct Pool {
  channels: Vec<WorkerChannels>,
  ingest: Vec<QueueSender>,
  global: QueueReceiver,
  registry: NameRegistry,
  tasks: Vec<JoinHandle<()>>,
  terminated: bool,
  /// Destination registered by the command currently in flight.
  pending: Option<String>,
  next_token: u64,
}

impl Engine {
  /// Spawns the worker pool on the current tokio runtime.
  ///
  /// # Errors
  ///
  /// Returns [`EngineError::Config`] for an invalid configuration and
  /// [`EngineError::NoRuntime`] when called outside a runtime.
  pub fn start(config: EngineConfig) -> Result<Self> {
    config.validate()?;
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

    let set = ChannelSet::new(config.workers);
    let tasks = set
      .endpoints
      .into_iter()
      .enumerate()
      .map(|(id, endpoints)| {
        let worker = Worker::new(id, endpoints, config.batch_size, config.transfer);
        runtime.spawn(worker.run())
      })
      .collect();

    info!(
      workers = config.workers,
      batch_size = config.batch_size,
      "worker pool started"
    );

    Ok(Self {
      pool: Mutex::new(Pool {
        channels: set.workers,
        ingest: set.ingest,
        global: set.global,
        registry: NameRegistry::new(),
        tasks,
        terminated: false,
        pending: None,
        next_token: 0,
      }),
      config,
    })
  }

  /// The configuration the pool was started with.
  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// Number of workers in the pool.
  pub fn worker_count(&self) -> usize {
    self.config.workers
  }

  /// Registers `name` and spreads `data` round-robin across the workers.
  ///
  /// A free `name` is used as given; a taken one gets the first free numeric
  /// suffix (`name0`, `name1`, ...). Check [`Dataset::name`] for the result.
  pub async fn distribute<T, I>(&self, name: &str, data: I) -> Result<Dataset<'_, T>>
  where
    T: Record,
    I: IntoIterator<Item = T>,
  {
    let mut pool = self.pool.lock().await;
    pool.acquire(&self.config, QueueCheck::Include).await?;

    let name = pool.registry.register(name);
    pool.pending = Some(name.clone());
    let mut outbox = Outbox::new(&pool.ingest, self.config.batch_size);
    outbox.spread(data);
    let sent = outbox.finish();
    mark_done(&pool.ingest);
    debug!(dataset = %name, records = sent, "distributed");

    pool.broadcast(Command::AddDataset {
      name: name.clone(),
      producers: 1,
      empty: empty_partition::<T>,
    })?;
    Ok(Dataset::new(self, name))
  }

  /// Applies `func` to every record.
  pub async fn map<T, U, F>(
    &self,
    func: F,
    dataset: &Dataset<'_, T>,
    inplace: bool,
  ) -> Result<Dataset<'_, U>>
  where
    T: Record,
    U: Record,
    F: Fn(&T) -> U + Send + Sync + 'static,
  {
    self
      .apply(Action::Map, dataset.name(), inplace, ops::map::<T, U, F>(func))
      .await
  }

  /// Applies `func` to every record and concatenates the outputs.
  pub async fn flatmap<T, U, I, F>(
    &self,
    func: F,
    dataset: &Dataset<'_, T>,
    inplace: bool,
  ) -> Result<Dataset<'_, U>>
  where
    T: Record,
    U: Record,
    I: IntoIterator<Item = U>,
    F: Fn(&T) -> I + Send + Sync + 'static,
  {
    self
      .apply(Action::FlatMap, dataset.name(), inplace, ops::flat_map::<T, U, I, F>(func))
      .await
  }

  /// Keeps the records for which `predicate` holds.
  pub async fn filter<T, F>(
    &self,
    predicate: F,
    dataset: &Dataset<'_, T>,
    inplace: bool,
  ) -> Result<Dataset<'_, T>>
  where
    T: Record,
    F: Fn(&T) -> bool + Send + Sync + 'static,
  {
    self
      .apply(Action::Filter, dataset.name(), inplace, ops::filter::<T, F>(predicate))
      .await
  }

  /// Combines values per key within each worker's partition.
  ///
  /// Keys held by several workers stay split; use [`reduce2`](Engine::reduce2)
  /// for a global aggregate.
  pub async fn reduce<K, V, F>(
    &self,
    func: F,
    dataset: &Dataset<'_, (K, V)>,
    inplace: bool,
  ) -> Result<Dataset<'_, (K, V)>>
  where
    K: Record + Eq + Hash,
    V: Record,
    F: Fn(V, V) -> V + Send + Sync + 'static,
  {
    let func: Combiner<V> = Arc::new(func);
    self.reduce_with(func, dataset.name(), inplace).await
  }

  /// Global reduce: local combine, shuffle by key, then a final in-place reduce.
  pub async fn reduce2<K, V, F>(
    &self,
    func: F,
    dataset: &Dataset<'_, (K, V)>,
    inplace: bool,
  ) -> Result<Dataset<'_, (K, V)>>
  where
    K: Record + Eq + Hash + PartitionKey,
    V: Record,
    F: Fn(V, V) -> V + Send + Sync + 'static,
  {
    let func: Combiner<V> = Arc::new(func);
    let combined = self
      .reduce_with::<K, V>(func.clone(), dataset.name(), inplace)
      .await?;
    let shuffled = self.partition(&combined).await?;
    self.reduce_with(func, shuffled.name(), true).await
  }

  async fn reduce_with<K, V>(
    &self,
    func: Combiner<V>,
    name: &str,
    inplace: bool,
  ) -> Result<Dataset<'_, (K, V)>>
  where
    K: Record + Eq + Hash,
    V: Record,
  {
    self
      .apply(Action::Reduce, name, inplace, ops::reduce::<K, V>(func))
      .await
  }

  async fn apply<U: Record>(
    &self,
    action: Action,
    src: &str,
    inplace: bool,
    transform: Transform,
  ) -> Result<Dataset<'_, U>> {
    let mut pool = self.pool.lock().await;
    pool.acquire(&self.config, QueueCheck::Include).await?;
    pool.registry.ensure(src)?;

    let dest = if inplace {
      src.to_string()
    } else {
      let dest = pool.derive_name(src, action.as_str());
      pool.pending = Some(dest.clone());
      dest
    };
    pool.broadcast(Command::Apply {
      action,
      src: src.to_string(),
      dest: dest.clone(),
      transform,
    })?;
    Ok(Dataset::new(self, dest))
  }

  /// Shuffles `(key, value)` records so each key lives on worker
  /// `hash(key) mod workers`.
  pub async fn partition<K, V>(&self, dataset: &Dataset<'_, (K, V)>) -> Result<Dataset<'_, (K, V)>>
  where
    K: Record + PartitionKey,
    V: Record,
  {
    self.partition_by(dataset, |record: &(K, V)| record.0.partition_hash()).await
  }

  /// Shuffles records so each lands on worker `hash(by(record)) mod workers`.
  ///
  /// Runs in two phases with a barrier between them: every worker first
  /// routes its partition into its peers' ingest queues, then every worker
  /// re-ingests what it received under the same name. If routing fails the
  /// second phase still runs to keep the queues clean, and the dataset is
  /// dropped.
  pub async fn partition_by<T, K, F>(
    &self,
    dataset: &Dataset<'_, T>,
    by: F,
  ) -> Result<Dataset<'_, T>>
  where
    T: Record,
    K: PartitionKey,
    F: Fn(&T) -> K + Send + Sync + 'static,
  {
    let mut pool = self.pool.lock().await;
    pool.acquire(&self.config, QueueCheck::Include).await?;
    let name = dataset.name().to_string();
    pool.registry.ensure(&name)?;

    pool.broadcast(Command::Partition {
      name: name.clone(),
      router: ops::router::<T, K, F>(by),
    })?;
    let routed = pool.settle(&self.config).await?;

    pool.broadcast(Command::AddDataset {
      name: name.clone(),
      producers: self.config.workers,
      empty: empty_partition::<T>,
    })?;
    let ingested = pool.settle(&self.config).await?;

    if let Some(failure) = routed.or(ingested) {
      pool.rollback(&self.config, &name).await?;
      return Err(failure);
    }
    Ok(Dataset::new(self, name))
  }

  /// Concatenates `datasets` in order into a new dataset.
  pub async fn merge<'e, T: Record>(&'e self, datasets: &[&Dataset<'_, T>]) -> Result<Dataset<'e, T>> {
    if datasets.is_empty() {
      return Err(EngineError::EmptyMerge);
    }
    let mut pool = self.pool.lock().await;
    pool.acquire(&self.config, QueueCheck::Include).await?;
    let srcs: Vec<String> = datasets.iter().map(|d| d.name().to_string()).collect();
    for src in &srcs {
      pool.registry.ensure(src)?;
    }

    let base = std::iter::once("merge")
      .chain(srcs.iter().map(String::as_str))
      .collect::<Vec<_>>()
      .join("/");
    let dest = pool.registry.register(&base);
    pool.pending = Some(dest.clone());
    pool.broadcast(Command::Merge {
      srcs,
      dest: dest.clone(),
    })?;
    Ok(Dataset::new(self, dest))
  }

  /// Duplicates a dataset under a new name.
  pub async fn copy<T: Record>(&self, dataset: &Dataset<'_, T>) -> Result<Dataset<'_, T>> {
    let mut pool = self.pool.lock().await;
    pool.acquire(&self.config, QueueCheck::Include).await?;
    let src = dataset.name().to_string();
    pool.registry.ensure(&src)?;

    let dest = pool.derive_name(&src, "copy");
    pool.pending = Some(dest.clone());
    pool.broadcast(Command::Copy {
      src,
      dest: dest.clone(),
    })?;
    Ok(Dataset::new(self, dest))
  }

  /// Total number of records across all workers.
  pub async fn count<T>(&self, dataset: &Dataset<'_, T>) -> Result<usize> {
    Ok(self.partition_counts(dataset).await?.into_iter().sum())
  }

  /// Number of records held by each worker, indexed by worker id.
  pub async fn partition_counts<T>(&self, dataset: &Dataset<'_, T>) -> Result<Vec<usize>> {
    let mut pool = self.pool.lock().await;
    pool.acquire(&self.config, QueueCheck::Include).await?;
    pool.registry.ensure(dataset.name())?;

    pool.broadcast(Command::Count {
      name: dataset.name().to_string(),
    })?;
    let mut counts = Vec::with_capacity(pool.channels.len());
    let mut failure = None;
    for (worker, channel) in pool.channels.iter_mut().enumerate() {
      match channel.replies.recv().await {
        Some(Reply::Count(n)) => counts.push(n),
        Some(Reply::Failed(source)) => {
          counts.push(0);
          if failure.is_none() {
            failure = Some(EngineError::Worker { worker, source });
          }
        }
        None => return Err(EngineError::WorkerGone(worker)),
      }
    }
    match failure {
      Some(e) => Err(e),
      None => Ok(counts),
    }
  }

  /// Gathers every record back to the caller.
  ///
  /// Records from one worker keep their order; the interleaving across
  /// workers is unspecified. With `remove` set the dataset is consumed and
  /// its name freed.
  ///
  /// A failed collect never leaves a partly consumed dataset behind. If every
  /// worker rejected it up front, for example over a record type mismatch,
  /// the dataset stays as it was. Otherwise it is dropped everywhere.
  pub async fn collect<T: Record>(&self, dataset: &Dataset<'_, T>, remove: bool) -> Result<Vec<T>> {
    let mut pool = self.pool.lock().await;
    pool.acquire(&self.config, QueueCheck::Include).await?;
    let name = dataset.name().to_string();
    pool.registry.ensure(&name)?;

    pool.broadcast(Command::Collect {
      name: name.clone(),
      take: remove,
      check: expect_type::<T>,
    })?;
    pool.wait_idle(&self.config).await?;
    let failures = pool.take_failures();
    let workers = pool.channels.len();
    let drained = drain(&mut pool.global, workers, &self.config.transfer).await;
    if !drained.is_complete() {
      warn!(
        dataset = %name,
        expected = drained.expected,
        finished = drained.finished,
        "collect may be incomplete"
      );
    }
    // Workers that rejected the command kept their partition; the rest
    // already gave theirs up.
    let kept = failures.iter().filter(|e| rejected_before_take(e)).count();
    if let Some(failure) = first_failure(failures) {
      if remove && kept < workers {
        pool.rollback(&self.config, &name).await?;
      }
      return Err(failure);
    }

    let Some(records) = flatten::<T>(drained.batches) else {
      if remove {
        pool.rollback(&self.config, &name).await?;
      }
      return Err(EngineError::TypeMismatch(type_name::<T>()));
    };
    if remove {
      pool.registry.unregister(&name)?;
    }
    debug!(dataset = %name, records = records.len(), "collected");
    Ok(records)
  }

  /// Deletes a dataset from every worker and frees its name.
  ///
  /// # Errors
  ///
  /// [`EngineError::NotFound`] if the dataset is not registered, including
  /// when it was already removed.
  pub async fn remove<T>(&self, dataset: &Dataset<'_, T>) -> Result<()> {
    let mut pool = self.pool.lock().await;
    pool.registry.ensure(dataset.name())?;
    pool.acquire(&self.config, QueueCheck::Include).await?;

    pool.broadcast(Command::Remove {
      name: dataset.name().to_string(),
    })?;
    pool.registry.unregister(dataset.name())
  }

  /// Whether the dataset's name is registered. Does not touch the pool.
  pub async fn exists<T>(&self, dataset: &Dataset<'_, T>) -> bool {
    self.pool.lock().await.registry.contains(dataset.name())
  }

  /// Names of all live datasets, sorted.
  pub async fn datasets(&self) -> Vec<String> {
    self.pool.lock().await.registry.names()
  }

  /// Whether [`terminate`](Engine::terminate) has run.
  pub async fn is_terminated(&self) -> bool {
    self.pool.lock().await.terminated
  }

  /// Stops every worker once the pool is idle and waits for them to exit.
  /// Repeated calls are no-ops.
  pub async fn terminate(&self) -> Result<()> {
    let mut pool = self.pool.lock().await;
    if pool.terminated {
      return Ok(());
    }
    if let Err(e) = pool.acquire(&self.config, QueueCheck::Include).await {
      warn!(error = %e, "terminating after failed command");
    }
    debug!(action = "terminate", "broadcast");
    for (worker, channel) in pool.channels.iter().enumerate() {
      if !channel.send(Command::Terminate) {
        warn!(worker, "worker already stopped");
      }
    }
    pool.terminated = true;

    for (worker, result) in futures::future::join_all(pool.tasks.drain(..))
      .await
      .into_iter()
      .enumerate()
    {
      if let Err(e) = result {
        warn!(worker, error = %e, "worker task did not exit cleanly");
      }
    }
    info!("worker pool terminated");
    Ok(())
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    let pool = self.pool.get_mut();
    if pool.terminated {
      return;
    }
    debug!("engine dropped without terminate; stopping workers");
    for channel in &pool.channels {
      channel.send(Command::Terminate);
    }
    pool.terminated = true;
  }
}

impl Pool {
  fn ensure_running(&self) -> Result<()> {
    if self.terminated {
      Err(EngineError::Terminated)
    } else {
      Ok(())
    }
  }

  /// Sends `command` to every worker.
  fn broadcast(&mut self, command: Command) -> Result<()> {
    self.ensure_running()?;
    debug!(action = command.action(), "broadcast");
    for (worker, channel) in self.channels.iter().enumerate() {
      if !channel.send(command.clone()) {
        return Err(EngineError::WorkerGone(worker));
      }
    }
    Ok(())
  }

  /// Registers a derived name `src/operation/token`.
  fn derive_name(&mut self, src: &str, operation: &str) -> String {
    let token = self.next_token;
    self.next_token += 1;
    self
      .registry
      .register(&format!("{}/{}/{:x}", src, operation, token))
  }

  fn all_idle(&self) -> bool {
    self.channels.iter().all(|c| !c.status.is_busy())
  }

  fn queues_empty(&self) -> bool {
    self.global.is_empty() && self.ingest.iter().all(|q| q.depth() == 0)
  }

  /// Waits until every worker is idle, then returns the first failure
  /// reported for the commands since the last barrier.
  async fn settle(&mut self, config: &EngineConfig) -> Result<Option<EngineError>> {
    self.wait_idle(config).await?;
    Ok(first_failure(self.take_failures()))
  }

  /// Polls until no command is in flight. A worker task that has exited
  /// while busy can never go idle, so it is reported as gone.
  async fn wait_idle(&mut self, config: &EngineConfig) -> Result<()> {
    let started = Instant::now();
    while !self.all_idle() {
      if let Some(worker) = self.tasks.iter().position(|task| task.is_finished()) {
        return Err(EngineError::WorkerGone(worker));
      }
      check_timeout(config, started)?;
      tokio::time::sleep(config.barrier_poll).await;
    }
    Ok(())
  }

  /// Every failure reply received so far, in worker order.
  fn take_failures(&mut self) -> Vec<EngineError> {
    let mut failures = Vec::new();
    for (worker, channel) in self.channels.iter_mut().enumerate() {
      while let Ok(reply) = channel.replies.try_recv() {
        if let Reply::Failed(source) = reply {
          failures.push(EngineError::Worker { worker, source });
        }
      }
    }
    failures
  }

  /// The idle barrier. Fails fast once terminated, and surfaces failures of
  /// the previous command after rolling back its destination.
  async fn acquire(&mut self, config: &EngineConfig, queues: QueueCheck) -> Result<()> {
    self.ensure_running()?;
    let started = Instant::now();
    loop {
      if let Some(failure) = self.settle(config).await? {
        if let Some(name) = self.pending.take() {
          self.rollback(config, &name).await?;
        }
        return Err(failure);
      }
      if queues == QueueCheck::Skip || self.queues_empty() {
        self.pending = None;
        return Ok(());
      }
      check_timeout(config, started)?;
      tokio::time::sleep(config.barrier_poll).await;
    }
  }

  /// Frees `name` and deletes whatever partitions of it exist.
  async fn rollback(&mut self, config: &EngineConfig, name: &str) -> Result<()> {
    debug!(dataset = name, "rolling back");
    let _ = self.registry.unregister(name);
    self.broadcast(Command::Discard {
      name: name.to_string(),
    })?;
    if let Some(e) = self.settle(config).await? {
      warn!(error = %e, "failure while rolling back");
    }
    Ok(())
  }
}

fn check_timeout(config: &EngineConfig, started: Instant) -> Result<()> {
  match config.barrier_timeout {
    Some(limit) if started.elapsed() >= limit => Err(EngineError::BarrierTimeout(limit)),
    _ => Ok(()),
  }
}

/// First failure of a command; the rest are logged.
fn first_failure(failures: Vec<EngineError>) -> Option<EngineError> {
  let mut failures = failures.into_iter();
  let first = failures.next();
  for extra in failures {
    warn!(error = %extra, "additional worker failure");
  }
  first
}

/// Whether a collect failure happened before the worker gave up its partition.
fn rejected_before_take(error: &EngineError) -> bool {
  matches!(
    error.worker_error(),
    Some(WorkerError::UnknownDataset(_) | WorkerError::TypeMismatch { .. })
  )
}

#[cfg(test)]
impl Engine {
  /// Aborts a worker task with a command still in flight.
  pub(crate) async fn kill_worker(&self, worker: usize) {
    let pool = self.pool.lock().await;
    pool.channels[worker].send(Command::Discard {
      name: String::new(),
    });
    pool.tasks[worker].abort();
  }
}
