//! Per-worker channel set.
//!
//! Every worker gets a control channel (commands in, replies out), a bulk
//! ingest queue, and a busy/idle status. All workers also share the global
//! result queue. The orchestrator owns every dispatch endpoint; each worker
//! exclusively owns the consumer end of its own ingest queue, plus sender
//! clones of every peer's ingest queue for the shuffle.

use crate::command::{Command, Reply};
use crate::transfer::{QueueReceiver, QueueSender, queue};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Busy/idle flag of one worker.
///
/// Counts commands dispatched but not yet completed. The orchestrator raises
/// it before sending, the worker lowers it after finishing, so a barrier can
/// never observe "idle" between dispatch and receipt.
#[derive(Debug, Default)]
pub(crate) struct WorkerStatus {
  in_flight: AtomicUsize,
}

impl WorkerStatus {
  pub(crate) fn dispatched(&self) {
    self.in_flight.fetch_add(1, Ordering::SeqCst);
  }

  pub(crate) fn completed(&self) {
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
  }

  /// `true` while a command is queued or executing.
  pub(crate) fn is_busy(&self) -> bool {
    self.in_flight.load(Ordering::SeqCst) > 0
  }
}

/// Orchestrator-side endpoints for one worker.
pub(crate) struct WorkerChannels {
  commands: mpsc::UnboundedSender<Command>,
  pub(crate) replies: mpsc::UnboundedReceiver<Reply>,
  pub(crate) status: Arc<WorkerStatus>,
}

impl WorkerChannels {
  /// Dispatches a command. Returns `false` if the worker has exited.
  pub(crate) fn send(&self, command: Command) -> bool {
    self.status.dispatched();
    if self.commands.send(command).is_err() {
      self.status.completed();
      return false;
    }
    true
  }
}

/// Worker-side endpoints.
pub(crate) struct WorkerEndpoints {
  pub(crate) commands: mpsc::UnboundedReceiver<Command>,
  pub(crate) replies: mpsc::UnboundedSender<Reply>,
  pub(crate) status: Arc<WorkerStatus>,
  /// This worker's inbound bulk queue.
  pub(crate) ingest: QueueReceiver,
  /// Ingest queues of every worker, indexed by worker id.
  pub(crate) peers: Vec<QueueSender>,
  /// Shared result queue.
  pub(crate) global: QueueSender,
}

/// All channels of a pool, split by owner.
pub(crate) struct ChannelSet {
  pub(crate) workers: Vec<WorkerChannels>,
  pub(crate) ingest: Vec<QueueSender>,
  pub(crate) global: QueueReceiver,
  pub(crate) endpoints: Vec<WorkerEndpoints>,
}

impl ChannelSet {
  /// Wires channels for `workers` workers.
  pub(crate) fn new(workers: usize) -> Self {
    let (global_tx, global_rx) = queue();
    let (ingest, ingest_rxs): (Vec<_>, Vec<_>) = (0..workers).map(|_| queue()).unzip();

    let mut channels = Vec::with_capacity(workers);
    let mut endpoints = Vec::with_capacity(workers);
    for ingest_rx in ingest_rxs {
      let (command_tx, command_rx) = mpsc::unbounded_channel();
      let (reply_tx, reply_rx) = mpsc::unbounded_channel();
      let status = Arc::new(WorkerStatus::default());
      channels.push(WorkerChannels {
        commands: command_tx,
        replies: reply_rx,
        status: status.clone(),
      });
      endpoints.push(WorkerEndpoints {
        commands: command_rx,
        replies: reply_tx,
        status,
        ingest: ingest_rx,
        peers: ingest.clone(),
        global: global_tx.clone(),
      });
    }

    Self {
      workers: channels,
      ingest,
      global: global_rx,
      endpoints,
    }
  }
}
