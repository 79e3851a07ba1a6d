//! Bulk-transfer queues and the bounded-retry receiver.
//!
//! Records move between the orchestrator and workers in [`Batch`]es over
//! unbounded multi-producer queues. Each producer ends its contribution with a
//! [`Transfer::Done`] marker, so a consumer that knows how many producers to
//! expect can stop as soon as the last marker arrives.
//!
//! The receiver also keeps the empty-poll heuristic as a fallback: after
//! `max_empty_polls` consecutive polls without a message it assumes every
//! producer has finished. A producer slower than the whole retry budget can
//! therefore be cut off; that case is logged and reported as an incomplete
//! drain.

use crate::config::RetryPolicy;
use crate::record::{Batch, Record};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// A message on a bulk queue.
pub(crate) enum Transfer {
  /// A chunk of records.
  Batch(Batch),
  /// The sending producer has pushed everything it had.
  Done,
}

/// Sending half of a bulk queue. Cheap to clone; every clone shares the depth gauge.
#[derive(Clone)]
pub(crate) struct QueueSender {
  tx: mpsc::UnboundedSender<Transfer>,
  depth: Arc<AtomicUsize>,
}

/// Receiving half of a bulk queue.
pub(crate) struct QueueReceiver {
  rx: mpsc::UnboundedReceiver<Transfer>,
  depth: Arc<AtomicUsize>,
}

/// Creates a bulk queue.
pub(crate) fn queue() -> (QueueSender, QueueReceiver) {
  let (tx, rx) = mpsc::unbounded_channel();
  let depth = Arc::new(AtomicUsize::new(0));
  (
    QueueSender {
      tx,
      depth: depth.clone(),
    },
    QueueReceiver { rx, depth },
  )
}

impl QueueSender {
  /// Pushes a message. Returns `false` if the consumer is gone.
  pub(crate) fn send(&self, message: Transfer) -> bool {
    self.depth.fetch_add(1, Ordering::SeqCst);
    if self.tx.send(message).is_err() {
      self.depth.fetch_sub(1, Ordering::SeqCst);
      return false;
    }
    true
  }

  /// Messages pushed but not yet received.
  pub(crate) fn depth(&self) -> usize {
    self.depth.load(Ordering::SeqCst)
  }
}

impl QueueReceiver {
  async fn recv_timeout(&mut self, timeout: std::time::Duration) -> Poll {
    match tokio::time::timeout(timeout, self.rx.recv()).await {
      Ok(Some(message)) => {
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Poll::Message(message)
      }
      Ok(None) => Poll::Closed,
      Err(_) => Poll::Empty,
    }
  }

  /// Messages pushed but not yet received.
  pub(crate) fn depth(&self) -> usize {
    self.depth.load(Ordering::SeqCst)
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.depth() == 0
  }
}

enum Poll {
  Message(Transfer),
  Empty,
  Closed,
}

/// Result of draining a bulk queue.
pub(crate) struct Drained {
  /// Batches in arrival order.
  pub(crate) batches: Vec<Batch>,
  /// Done-markers received.
  pub(crate) finished: usize,
  /// Done-markers the drain waited for.
  pub(crate) expected: usize,
}

impl Drained {
  /// Whether every expected producer signalled completion.
  pub(crate) fn is_complete(&self) -> bool {
    self.finished >= self.expected
  }
}

/// Drains `rx` until `producers` done-markers have arrived, the retry budget
/// is exhausted, or every sender is dropped.
pub(crate) async fn drain(
  rx: &mut QueueReceiver,
  producers: usize,
  policy: &RetryPolicy,
) -> Drained {
  let mut drained = Drained {
    batches: Vec::new(),
    finished: 0,
    expected: producers,
  };
  let mut empty_polls = 0;
  while drained.finished < producers {
    match rx.recv_timeout(policy.poll_interval).await {
      Poll::Message(Transfer::Batch(batch)) => {
        drained.batches.push(batch);
        empty_polls = 0;
      }
      Poll::Message(Transfer::Done) => {
        drained.finished += 1;
        empty_polls = 0;
      }
      Poll::Empty => {
        empty_polls += 1;
        if empty_polls >= policy.max_empty_polls {
          warn!(
            expected = producers,
            finished = drained.finished,
            batches = drained.batches.len(),
            "bulk transfer gave up after {} empty polls",
            empty_polls
          );
          break;
        }
      }
      Poll::Closed => break,
    }
  }
  drained
}

/// Per-destination output buffers.
///
/// Records are routed into one buffer per destination queue; a buffer is
/// flushed as a single batch once it holds `batch_size` records.
/// [`finish`](Outbox::finish) flushes the rest. Done-markers are left to the
/// caller, which must send them even when routing failed halfway.
pub(crate) struct Outbox<'a, T> {
  queues: &'a [QueueSender],
  buffers: Vec<Vec<T>>,
  batch_size: usize,
  sent: usize,
}

impl<'a, T: Record> Outbox<'a, T> {
  pub(crate) fn new(queues: &'a [QueueSender], batch_size: usize) -> Self {
    Self {
      queues,
      buffers: (0..queues.len()).map(|_| Vec::new()).collect(),
      batch_size: batch_size.max(1),
      sent: 0,
    }
  }

  /// Buffers `record` for destination `dest`, flushing when the buffer is full.
  pub(crate) fn push(&mut self, dest: usize, record: T) {
    self.buffers[dest].push(record);
    if self.buffers[dest].len() >= self.batch_size {
      self.flush(dest);
    }
  }

  /// Sends a lazily produced sequence round-robin across all destinations.
  pub(crate) fn spread<I: IntoIterator<Item = T>>(&mut self, records: I) {
    let n = self.queues.len();
    for (i, record) in records.into_iter().enumerate() {
      self.push(i % n, record);
    }
  }

  fn flush(&mut self, dest: usize) {
    let records = std::mem::take(&mut self.buffers[dest]);
    if records.is_empty() {
      return;
    }
    trace!(dest, records = records.len(), "flushing batch");
    self.sent += records.len();
    self.queues[dest].send(Transfer::Batch(Box::new(records)));
  }

  /// Flushes the remaining buffers and returns the number of records sent.
  pub(crate) fn finish(mut self) -> usize {
    for dest in 0..self.buffers.len() {
      self.flush(dest);
    }
    self.sent
  }
}

/// Sends a done-marker to every queue.
pub(crate) fn mark_done(queues: &[QueueSender]) {
  for queue in queues {
    queue.send(Transfer::Done);
  }
}

/// Pushes pre-chunked records to one queue, then a done-marker.
pub(crate) fn send_all(queue: &QueueSender, chunks: Vec<Batch>) {
  for chunk in chunks {
    queue.send(Transfer::Batch(chunk));
  }
  queue.send(Transfer::Done);
}

/// Flattens drained batches of `T` into one vector, preserving arrival order.
pub(crate) fn flatten<T: Record>(drained: Vec<Batch>) -> Option<Vec<T>> {
  let mut out = Vec::new();
  for batch in drained {
    out.extend(*batch.downcast::<Vec<T>>().ok()?);
  }
  Some(out)
}
