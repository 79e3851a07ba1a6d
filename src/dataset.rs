//! Dataset handles.
//!
//! A [`Dataset`] is a named reference to data spread over the pool. It holds
//! no records itself; every method forwards to the [`Engine`] that created it.

use crate::engine::Engine;
use crate::error::Result;
use crate::partitioner::PartitionKey;
use crate::record::Record;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Handle to a distributed dataset of `T` records.
pub struct Dataset<'e, T> {
  engine: &'e Engine,
  name: String,
  _record: PhantomData<fn() -> T>,
}

impl<'e, T> Dataset<'e, T> {
  pub(crate) fn new(engine: &'e Engine, name: String) -> Self {
    Self {
      engine,
      name,
      _record: PhantomData,
    }
  }

  /// Registered name of the dataset.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// The engine this handle addresses.
  pub fn engine(&self) -> &'e Engine {
    self.engine
  }

  /// See [`Engine::count`].
  pub async fn count(&self) -> Result<usize> {
    self.engine.count(self).await
  }

  /// See [`Engine::partition_counts`].
  pub async fn partition_counts(&self) -> Result<Vec<usize>> {
    self.engine.partition_counts(self).await
  }

  /// See [`Engine::remove`].
  pub async fn remove(&self) -> Result<()> {
    self.engine.remove(self).await
  }

  /// See [`Engine::exists`].
  pub async fn exists(&self) -> bool {
    self.engine.exists(self).await
  }
}

impl<'e, T: Record> Dataset<'e, T> {
  /// See [`Engine::map`].
  pub async fn map<U, F>(&self, func: F, inplace: bool) -> Result<Dataset<'e, U>>
  where
    U: Record,
    F: Fn(&T) -> U + Send + Sync + 'static,
  {
    self.engine.map(func, self, inplace).await
  }

  /// See [`Engine::flatmap`].
  pub async fn flatmap<U, I, F>(&self, func: F, inplace: bool) -> Result<Dataset<'e, U>>
  where
    U: Record,
    I: IntoIterator<Item = U>,
    F: Fn(&T) -> I + Send + Sync + 'static,
  {
    self.engine.flatmap(func, self, inplace).await
  }

  /// See [`Engine::filter`].
  pub async fn filter<F>(&self, predicate: F, inplace: bool) -> Result<Dataset<'e, T>>
  where
    F: Fn(&T) -> bool + Send + Sync + 'static,
  {
    self.engine.filter(predicate, self, inplace).await
  }

  /// See [`Engine::partition_by`].
  pub async fn partition_by<K, F>(&self, by: F) -> Result<Dataset<'e, T>>
  where
    K: PartitionKey,
    F: Fn(&T) -> K + Send + Sync + 'static,
  {
    self.engine.partition_by(self, by).await
  }

  /// See [`Engine::merge`]. `self` comes first, followed by `others` in order.
  pub async fn merge(&self, others: &[&Dataset<'_, T>]) -> Result<Dataset<'e, T>> {
    let mut all = Vec::with_capacity(others.len() + 1);
    all.push(self);
    all.extend_from_slice(others);
    self.engine.merge(&all).await
  }

  /// See [`Engine::copy`].
  pub async fn copy(&self) -> Result<Dataset<'e, T>> {
    self.engine.copy(self).await
  }

  /// See [`Engine::collect`].
  pub async fn collect(&self, remove: bool) -> Result<Vec<T>> {
    self.engine.collect(self, remove).await
  }
}

impl<'e, K, V> Dataset<'e, (K, V)>
where
  K: Record + Eq + Hash,
  V: Record,
{
  /// See [`Engine::reduce`].
  pub async fn reduce<F>(&self, func: F, inplace: bool) -> Result<Dataset<'e, (K, V)>>
  where
    F: Fn(V, V) -> V + Send + Sync + 'static,
  {
    self.engine.reduce(func, self, inplace).await
  }

  /// See [`Engine::reduce2`].
  pub async fn reduce2<F>(&self, func: F, inplace: bool) -> Result<Dataset<'e, (K, V)>>
  where
    K: PartitionKey,
    F: Fn(V, V) -> V + Send + Sync + 'static,
  {
    self.engine.reduce2(func, self, inplace).await
  }

  /// See [`Engine::partition`].
  pub async fn partition(&self) -> Result<Dataset<'e, (K, V)>>
  where
    K: PartitionKey,
  {
    self.engine.partition(self).await
  }
}

impl<T> Clone for Dataset<'_, T> {
  fn clone(&self) -> Self {
    Self {
      engine: self.engine,
      name: self.name.clone(),
      _record: PhantomData,
    }
  }
}

impl<T> fmt::Debug for Dataset<'_, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Dataset")
      .field("name", &self.name)
      .field("record", &std::any::type_name::<T>())
      .finish()
  }
}
