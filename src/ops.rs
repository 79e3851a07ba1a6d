//! Record-level operators executed by workers.
//!
//! Each builder turns a typed user function into an erased [`Transform`] or
//! [`Router`] that a worker can run against its partitions without knowing
//! the record types involved.

use crate::command::{Router, Transform};
use crate::error::WorkerError;
use crate::partitioner::{PartitionKey, worker_index};
use crate::record::{Partition, Record, downcast_owned, downcast_ref};
use crate::transfer::{Outbox, QueueSender};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Shared binary combiner used by `reduce` and `reduce2`.
pub(crate) type Combiner<V> = Arc<dyn Fn(V, V) -> V + Send + Sync>;

/// `func` applied to every record, order preserved.
pub(crate) fn map<T, U, F>(func: F) -> Transform
where
  T: Record,
  U: Record,
  F: Fn(&T) -> U + Send + Sync + 'static,
{
  Arc::new(move |partition: &dyn Partition| -> Result<Box<dyn Partition>, WorkerError> {
    let records = downcast_ref::<T>(partition)?;
    let out: Vec<U> = records.iter().map(&func).collect();
    Ok(Box::new(out) as Box<dyn Partition>)
  })
}

/// Zero or more outputs per record, concatenated in input order.
pub(crate) fn flat_map<T, U, I, F>(func: F) -> Transform
where
  T: Record,
  U: Record,
  I: IntoIterator<Item = U>,
  F: Fn(&T) -> I + Send + Sync + 'static,
{
  Arc::new(move |partition: &dyn Partition| -> Result<Box<dyn Partition>, WorkerError> {
    let records = downcast_ref::<T>(partition)?;
    let out: Vec<U> = records.iter().flat_map(&func).collect();
    Ok(Box::new(out) as Box<dyn Partition>)
  })
}

/// Records for which `predicate` holds, order preserved.
pub(crate) fn filter<T, F>(predicate: F) -> Transform
where
  T: Record,
  F: Fn(&T) -> bool + Send + Sync + 'static,
{
  Arc::new(move |partition: &dyn Partition| -> Result<Box<dyn Partition>, WorkerError> {
    let records = downcast_ref::<T>(partition)?;
    let out: Vec<T> = records.iter().filter(|r| predicate(r)).cloned().collect();
    Ok(Box::new(out) as Box<dyn Partition>)
  })
}

/// Groups `(key, value)` records by key and left-folds each group's values
/// with `combine`. Keys come out in first-seen order.
pub(crate) fn reduce<K, V>(combine: Combiner<V>) -> Transform
where
  K: Record + Eq + Hash,
  V: Record,
{
  Arc::new(move |partition: &dyn Partition| -> Result<Box<dyn Partition>, WorkerError> {
    let records = downcast_ref::<(K, V)>(partition)?;
    let mut index: HashMap<&K, usize> = HashMap::new();
    let mut groups: Vec<(&K, Vec<&V>)> = Vec::new();
    for (key, value) in records {
      let slot = *index.entry(key).or_insert_with(|| {
        groups.push((key, Vec::new()));
        groups.len() - 1
      });
      groups[slot].1.push(value);
    }
    let out: Vec<(K, V)> = groups
      .into_iter()
      .filter_map(|(key, values)| {
        values
          .into_iter()
          .cloned()
          .reduce(|acc, value| combine(acc, value))
          .map(|folded| (key.clone(), folded))
      })
      .collect();
    Ok(Box::new(out) as Box<dyn Partition>)
  })
}

/// Routes every record to worker `hash(by(record)) mod workers`.
pub(crate) fn router<T, K, F>(by: F) -> Router
where
  T: Record,
  K: PartitionKey,
  F: Fn(&T) -> K + Send + Sync + 'static,
{
  Arc::new(
    move |partition: Box<dyn Partition>,
          queues: &[QueueSender],
          batch_size: usize|
          -> Result<usize, WorkerError> {
      let records = downcast_owned::<T>(partition)?;
      let mut outbox = Outbox::new(queues, batch_size);
      for record in records {
        let dest = worker_index(&by(&record), queues.len());
        outbox.push(dest, record);
      }
      Ok(outbox.finish())
    },
  )
}
