//! Type-erased partition storage.
//!
//! A worker's store holds datasets of different record types under one map,
//! so each partition is kept as a `Box<dyn Partition>` wrapping a `Vec<T>`.
//! Bulk transfers move [`Batch`]es, which are `Vec<T>` chunks erased to
//! `Box<dyn Any + Send>`. Commands built for a concrete `T` downcast back and
//! report [`WorkerError::TypeMismatch`] when the stored type differs.

use crate::batch::{batches, slice_batches};
use crate::error::WorkerError;
use std::any::{Any, type_name};

/// Bound satisfied by every record type the engine can move.
pub trait Record: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> Record for T {}

/// A chunk of records in flight on a bulk queue.
pub(crate) type Batch = Box<dyn Any + Send>;

/// One worker's slice of a dataset.
pub(crate) trait Partition: Send {
  /// Number of records held.
  fn len(&self) -> usize;

  /// Name of the record type, for error messages.
  fn record_type(&self) -> &'static str;

  fn as_any(&self) -> &dyn Any;

  fn into_any(self: Box<Self>) -> Box<dyn Any>;

  /// Shallow copy under a new owner.
  fn duplicate(&self) -> Box<dyn Partition>;

  /// Appends every record of an incoming batch.
  fn append_batch(&mut self, batch: Batch) -> Result<(), WorkerError>;

  /// Appends every record of another partition of the same type.
  fn extend_from(&mut self, other: &dyn Partition) -> Result<(), WorkerError>;

  /// Splits the partition into batches of at most `size` records.
  fn to_batches(&self, size: usize) -> Vec<Batch>;

  /// Like [`to_batches`](Partition::to_batches), but consumes the partition
  /// instead of cloning its records.
  fn into_batches(self: Box<Self>, size: usize) -> Vec<Batch>;
}

impl<T: Record> Partition for Vec<T> {
  fn len(&self) -> usize {
    Vec::len(self)
  }

  fn record_type(&self) -> &'static str {
    type_name::<T>()
  }

  fn as_any(&self) -> &dyn Any {
    self
  }

  fn into_any(self: Box<Self>) -> Box<dyn Any> {
    self
  }

  fn duplicate(&self) -> Box<dyn Partition> {
    Box::new(self.clone())
  }

  fn append_batch(&mut self, batch: Batch) -> Result<(), WorkerError> {
    let records = batch.downcast::<Vec<T>>().map_err(|_| WorkerError::TypeMismatch {
      expected: type_name::<T>(),
      found: "foreign batch",
    })?;
    self.extend(*records);
    Ok(())
  }

  fn extend_from(&mut self, other: &dyn Partition) -> Result<(), WorkerError> {
    let records = downcast_ref::<T>(other)?;
    self.extend(records.iter().cloned());
    Ok(())
  }

  fn to_batches(&self, size: usize) -> Vec<Batch> {
    slice_batches(self, size)
      .map(|chunk| Box::new(chunk) as Batch)
      .collect()
  }

  fn into_batches(self: Box<Self>, size: usize) -> Vec<Batch> {
    batches(*self, size)
      .map(|chunk| Box::new(chunk) as Batch)
      .collect()
  }
}

/// Builds an empty partition of `T`; carried by commands that may create one.
pub(crate) fn empty_partition<T: Record>() -> Box<dyn Partition> {
  Box::new(Vec::<T>::new())
}

/// Views a partition as its concrete records.
pub(crate) fn downcast_ref<T: Record>(partition: &dyn Partition) -> Result<&Vec<T>, WorkerError> {
  partition
    .as_any()
    .downcast_ref::<Vec<T>>()
    .ok_or_else(|| WorkerError::TypeMismatch {
      expected: type_name::<T>(),
      found: partition.record_type(),
    })
}

/// Succeeds when `partition` holds `T` records.
pub(crate) fn expect_type<T: Record>(partition: &dyn Partition) -> Result<(), WorkerError> {
  downcast_ref::<T>(partition).map(|_| ())
}

/// Takes ownership of a partition's concrete records.
pub(crate) fn downcast_owned<T: Record>(
  partition: Box<dyn Partition>,
) -> Result<Vec<T>, WorkerError> {
  let found = partition.record_type();
  partition
    .into_any()
    .downcast::<Vec<T>>()
    .map(|records| *records)
    .map_err(|_| WorkerError::TypeMismatch {
      expected: type_name::<T>(),
      found,
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_append_and_extend() {
    let mut part = empty_partition::<u32>();
    part.append_batch(Box::new(vec![1u32, 2])).unwrap();
    let other: Box<dyn Partition> = Box::new(vec![3u32]);
    part.extend_from(other.as_ref()).unwrap();
    assert_eq!(downcast_ref::<u32>(part.as_ref()).unwrap(), &vec![1, 2, 3]);
    assert_eq!(part.len(), 3);
  }

  #[test]
  fn test_type_mismatch_is_reported() {
    let mut part = empty_partition::<u32>();
    assert!(matches!(
      part.append_batch(Box::new(vec!["x".to_string()])),
      Err(WorkerError::TypeMismatch { .. })
    ));
    let err = downcast_ref::<String>(part.as_ref()).unwrap_err();
    assert_eq!(
      err,
      WorkerError::TypeMismatch {
        expected: type_name::<String>(),
        found: type_name::<u32>(),
      }
    );
  }

  #[test]
  fn test_duplicate_is_independent() {
    let part: Box<dyn Partition> = Box::new(vec![(1u8, 'a')]);
    let mut copy = part.duplicate();
    copy.append_batch(Box::new(vec![(2u8, 'b')])).unwrap();
    assert_eq!(part.len(), 1);
    assert_eq!(copy.len(), 2);
  }

  #[test]
  fn test_to_batches_and_owned_downcast() {
    let part: Box<dyn Partition> = Box::new((0..5u64).collect::<Vec<_>>());
    assert_eq!(part.to_batches(2).len(), 3);
    let owned = part.duplicate().into_batches(4);
    assert_eq!(owned.len(), 2);
    assert_eq!(downcast_owned::<u64>(part).unwrap(), vec![0, 1, 2, 3, 4]);
  }
}
