//! Engine configuration.
//!
//! The host supplies the pool size and bulk-transfer batch size; everything
//! else has defaults tuned for in-process workers.

use crate::error::ConfigError;
use std::time::Duration;

/// Polling budget of the bounded-retry receiver.
///
/// A drain stops once every expected producer has sent its done-marker. If a
/// producer never finishes, the drain gives up after `max_empty_polls`
/// consecutive polls of `poll_interval` that yielded nothing. Raise either
/// value to trade latency for certainty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// How long a single poll waits for the next message.
  pub poll_interval: Duration,
  /// Consecutive empty polls tolerated before the drain gives up.
  pub max_empty_polls: u32,
}

impl RetryPolicy {
  /// Creates a policy with the given interval and retry budget.
  pub fn new(poll_interval: Duration, max_empty_polls: u32) -> Self {
    Self {
      poll_interval,
      max_empty_polls,
    }
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_millis(100),
      max_empty_polls: 3,
    }
  }
}

/// Configuration consumed by [`Engine::start`](crate::engine::Engine::start).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
  /// Number of workers in the pool.
  pub workers: usize,
  /// Records per chunk for distribute, shuffle and collect transfers.
  pub batch_size: usize,
  /// Sleep between two polls of the idle barrier.
  pub barrier_poll: Duration,
  /// Give up waiting for the pool to settle after this long. `None` waits forever.
  pub barrier_timeout: Option<Duration>,
  /// Termination policy for bulk-queue drains.
  pub transfer: RetryPolicy,
}

impl EngineConfig {
  /// Creates a configuration for `workers` workers with default settings.
  pub fn new(workers: usize) -> Self {
    Self {
      workers,
      ..Self::default()
    }
  }

  /// Sets the pool size.
  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers;
    self
  }

  /// Sets the bulk-transfer batch size.
  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size;
    self
  }

  /// Sets the idle-barrier poll interval.
  pub fn with_barrier_poll(mut self, interval: Duration) -> Self {
    self.barrier_poll = interval;
    self
  }

  /// Sets the idle-barrier timeout.
  pub fn with_barrier_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.barrier_timeout = timeout;
    self
  }

  /// Sets the bulk-transfer retry policy.
  pub fn with_transfer(mut self, policy: RetryPolicy) -> Self {
    self.transfer = policy;
    self
  }

  /// Checks that the configuration can drive a pool.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.workers == 0 {
      return Err(ConfigError::NoWorkers);
    }
    if self.batch_size == 0 {
      return Err(ConfigError::ZeroBatchSize);
    }
    if self.transfer.max_empty_polls == 0 {
      return Err(ConfigError::ZeroRetries);
    }
    Ok(())
  }
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      workers: std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1),
      batch_size: 1024,
      barrier_poll: Duration::from_millis(10),
      barrier_timeout: None,
      transfer: RetryPolicy::default(),
    }
  }
}
