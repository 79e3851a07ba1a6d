//! Tests for the worker command loop, driven directly through its channels.

use crate::channel::{ChannelSet, WorkerChannels};
use crate::command::{Action, Command, Reply};
use crate::config::RetryPolicy;
use crate::error::WorkerError;
use crate::ops::{self, Combiner};
use crate::record::{empty_partition, expect_type};
use crate::transfer::{QueueReceiver, QueueSender, Transfer, drain, flatten};
use crate::worker::Worker;
use std::sync::Arc;
use std::time::Duration;

struct TestPool {
  workers: Vec<WorkerChannels>,
  ingest: Vec<QueueSender>,
  global: QueueReceiver,
}

fn policy() -> RetryPolicy {
  RetryPolicy::new(Duration::from_millis(50), 3)
}

fn spawn_pool(n: usize, batch_size: usize) -> TestPool {
  let set = ChannelSet::new(n);
  for (id, endpoints) in set.endpoints.into_iter().enumerate() {
    tokio::spawn(Worker::new(id, endpoints, batch_size, policy()).run());
  }
  TestPool {
    workers: set.workers,
    ingest: set.ingest,
    global: set.global,
  }
}

impl TestPool {
  async fn wait_idle(&self) {
    while self.workers.iter().any(|w| w.status.is_busy()) {
      tokio::time::sleep(Duration::from_millis(1)).await;
    }
  }

  fn send(&self, worker: usize, command: Command) {
    assert!(self.workers[worker].send(command));
  }

  fn broadcast(&self, command: Command) {
    for worker in 0..self.workers.len() {
      self.send(worker, command.clone());
    }
  }

  async fn reply(&mut self, worker: usize) -> Reply {
    self.workers[worker]
      .replies
      .recv()
      .await
      .expect("worker reply channel open")
  }

  async fn count(&mut self, worker: usize, name: &str) -> Reply {
    self.send(
      worker,
      Command::Count {
        name: name.to_string(),
      },
    );
    self.reply(worker).await
  }

  /// Ingests `records` into worker `worker` under `name`.
  async fn load<T: crate::record::Record>(&mut self, worker: usize, name: &str, records: Vec<T>) {
    self.ingest[worker].send(Transfer::Batch(Box::new(records)));
    self.ingest[worker].send(Transfer::Done);
    self.send(
      worker,
      Command::AddDataset {
        name: name.to_string(),
        producers: 1,
        empty: empty_partition::<T>,
      },
    );
    self.wait_idle().await;
  }
}

#[tokio::test]
async fn test_add_dataset_then_count() {
  let mut pool = spawn_pool(1, 4);
  pool.load(0, "x", vec![1u32, 2, 3]).await;
  assert!(matches!(pool.count(0, "x").await, Reply::Count(3)));
}

#[tokio::test]
async fn test_unknown_dataset_is_reported() {
  let mut pool = spawn_pool(1, 4);
  match pool.count(0, "missing").await {
    Reply::Failed(WorkerError::UnknownDataset(name)) => assert_eq!(name, "missing"),
    other => panic!("unexpected reply: {:?}", other),
  }
}

#[tokio::test]
async fn test_panicking_map_fails_without_destination() {
  let mut pool = spawn_pool(1, 4);
  pool.load(0, "x", vec![1u32, 0]).await;
  pool.send(
    0,
    Command::Apply {
      action: Action::Map,
      src: "x".to_string(),
      dest: "y".to_string(),
      transform: ops::map::<u32, u32, _>(|x| 10 / *x),
    },
  );
  match pool.reply(0).await {
    Reply::Failed(WorkerError::Panicked { operation, .. }) => assert_eq!(operation, "map"),
    other => panic!("unexpected reply: {:?}", other),
  }
  assert!(matches!(pool.count(0, "y").await, Reply::Failed(_)));
  // The worker keeps serving after a failure.
  assert!(matches!(pool.count(0, "x").await, Reply::Count(2)));
}

#[tokio::test]
async fn test_duplicate_add_dataset_drains_and_fails() {
  let mut pool = spawn_pool(1, 4);
  pool.load(0, "x", vec![1u8]).await;
  pool.load(0, "x", vec![2u8, 3]).await;
  match pool.reply(0).await {
    Reply::Failed(WorkerError::DatasetExists(name)) => assert_eq!(name, "x"),
    other => panic!("unexpected reply: {:?}", other),
  }
  assert_eq!(pool.ingest[0].depth(), 0);
  assert!(matches!(pool.count(0, "x").await, Reply::Count(1)));
}

#[tokio::test]
async fn test_type_mismatch_is_reported() {
  let mut pool = spawn_pool(1, 4);
  pool.load(0, "x", vec!["a".to_string()]).await;
  pool.send(
    0,
    Command::Apply {
      action: Action::Filter,
      src: "x".to_string(),
      dest: "y".to_string(),
      transform: ops::filter::<u32, _>(|_| true),
    },
  );
  assert!(matches!(
    pool.reply(0).await,
    Reply::Failed(WorkerError::TypeMismatch { .. })
  ));
}

#[tokio::test]
async fn test_reduce_keeps_first_seen_key_order() {
  let mut pool = spawn_pool(1, 8);
  pool
    .load(0, "pairs", vec![("b", 1u32), ("a", 2), ("b", 3), ("c", 4), ("a", 5)])
    .await;
  let add: Combiner<u32> = Arc::new(|a: u32, b: u32| a + b);
  pool.send(
    0,
    Command::Apply {
      action: Action::Reduce,
      src: "pairs".to_string(),
      dest: "sums".to_string(),
      transform: ops::reduce::<&'static str, u32>(add),
    },
  );
  pool.send(
    0,
    Command::Collect {
      name: "sums".to_string(),
      take: false,
      check: expect_type::<(&'static str, u32)>,
    },
  );
  pool.wait_idle().await;
  let drained = drain(&mut pool.global, 1, &policy()).await;
  assert!(drained.is_complete());
  assert_eq!(
    flatten::<(&str, u32)>(drained.batches),
    Some(vec![("b", 4), ("a", 7), ("c", 4)])
  );
}

#[tokio::test]
async fn test_merge_and_copy() {
  let mut pool = spawn_pool(1, 2);
  pool.load(0, "a", vec![1u16, 2]).await;
  pool.load(0, "b", vec![3u16]).await;
  pool.send(
    0,
    Command::Merge {
      srcs: vec!["b".to_string(), "a".to_string()],
      dest: "m".to_string(),
    },
  );
  pool.send(
    0,
    Command::Copy {
      src: "m".to_string(),
      dest: "c".to_string(),
    },
  );
  pool.send(
    0,
    Command::Remove {
      name: "m".to_string(),
    },
  );
  pool.send(
    0,
    Command::Collect {
      name: "c".to_string(),
      take: true,
      check: expect_type::<u16>,
    },
  );
  pool.wait_idle().await;
  let drained = drain(&mut pool.global, 1, &policy()).await;
  assert_eq!(flatten::<u16>(drained.batches), Some(vec![3, 1, 2]));
  assert!(matches!(pool.count(0, "c").await, Reply::Failed(_)));
  assert!(matches!(pool.count(0, "a").await, Reply::Count(2)));
}

#[tokio::test]
async fn test_partition_shuffles_by_key() {
  let mut pool = spawn_pool(2, 1);
  pool
    .load(0, "kv", vec![(0u64, 'a'), (1, 'b'), (2, 'c'), (3, 'd'), (5, 'e')])
    .await;
  pool.load(1, "kv", Vec::<(u64, char)>::new()).await;

  pool.broadcast(Command::Partition {
    name: "kv".to_string(),
    router: ops::router::<(u64, char), u64, _>(|r| r.0),
  });
  pool.wait_idle().await;
  pool.broadcast(Command::AddDataset {
    name: "kv".to_string(),
    producers: 2,
    empty: empty_partition::<(u64, char)>,
  });
  pool.wait_idle().await;

  assert!(matches!(pool.count(0, "kv").await, Reply::Count(2)));
  assert!(matches!(pool.count(1, "kv").await, Reply::Count(3)));
  assert!(pool.ingest.iter().all(|q| q.depth() == 0));
}

#[tokio::test]
async fn test_failed_collect_still_marks_done() {
  let mut pool = spawn_pool(2, 4);
  pool.load(0, "x", vec![9i32]).await;
  pool.broadcast(Command::Collect {
    name: "x".to_string(),
    take: false,
    check: expect_type::<i32>,
  });
  pool.wait_idle().await;
  let drained = tokio::time::timeout(Duration::from_secs(1), drain(&mut pool.global, 2, &policy()))
    .await
    .expect("both workers send a done-marker");
  assert!(drained.is_complete());
  assert_eq!(flatten::<i32>(drained.batches), Some(vec![9]));
  assert!(matches!(
    pool.reply(1).await,
    Reply::Failed(WorkerError::UnknownDataset(_))
  ));
}

#[tokio::test]
async fn test_terminate_ends_command_loop() {
  let pool = spawn_pool(1, 4);
  pool.send(0, Command::Terminate);
  pool.wait_idle().await;
  // Give the task a moment to drop its receiver.
  tokio::time::sleep(Duration::from_millis(20)).await;
  assert!(!pool.workers[0].send(Command::Terminate));
}

/// Record whose clone panics.
#[derive(Debug)]
struct Unclonable;

impl Clone for Unclonable {
  fn clone(&self) -> Self {
    panic!("record cannot be cloned")
  }
}

#[tokio::test]
async fn test_panic_outside_user_code_keeps_worker_alive() {
  let mut pool = spawn_pool(1, 4);
  pool.load(0, "u", vec![Unclonable, Unclonable]).await;
  pool.send(
    0,
    Command::Copy {
      src: "u".to_string(),
      dest: "c".to_string(),
    },
  );
  pool.wait_idle().await;
  match pool.reply(0).await {
    Reply::Failed(WorkerError::Panicked { operation, .. }) => assert_eq!(operation, "copy"),
    other => panic!("unexpected reply: {:?}", other),
  }

  pool.send(
    0,
    Command::Collect {
      name: "u".to_string(),
      take: false,
      check: expect_type::<Unclonable>,
    },
  );
  pool.wait_idle().await;
  let drained = tokio::time::timeout(Duration::from_secs(1), drain(&mut pool.global, 1, &policy()))
    .await
    .expect("collect sends its done-marker after a panic");
  assert!(drained.is_complete());
  assert!(matches!(
    pool.reply(0).await,
    Reply::Failed(WorkerError::Panicked { .. })
  ));
  assert!(matches!(pool.count(0, "u").await, Reply::Count(2)));
  assert!(matches!(pool.count(0, "c").await, Reply::Failed(_)));
}

#[tokio::test]
async fn test_collect_take_rejects_wrong_type_without_removing() {
  let mut pool = spawn_pool(1, 4);
  pool.load(0, "x", vec![1u64, 2]).await;
  pool.send(
    0,
    Command::Collect {
      name: "x".to_string(),
      take: true,
      check: expect_type::<String>,
    },
  );
  pool.wait_idle().await;
  let drained = drain(&mut pool.global, 1, &policy()).await;
  assert!(drained.is_complete());
  assert!(drained.batches.is_empty());
  assert!(matches!(
    pool.reply(0).await,
    Reply::Failed(WorkerError::TypeMismatch { .. })
  ));
  assert!(matches!(pool.count(0, "x").await, Reply::Count(2)));
}
