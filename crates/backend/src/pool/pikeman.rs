//! A single worker unit.
//!
//! The loop: ask for a job; on an empty reply wait out a growing delay and
//! ask again; on a path, process it and report `job_finished`. A raised stop
//! signal is honoured between jobs, never in the middle of one.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{PoolConfig, processor::JobProcessor};
use crate::ipc::{Client, IpcError};

/// Bounded exponential delay between empty job requests.
#[derive(Debug, Clone)]
pub struct Backoff {
  initial: Duration,
  max: Duration,
  current: Duration,
}

impl Backoff {
  pub fn new(initial: Duration, max: Duration) -> Self {
    let max = max.max(initial);
    Self {
      initial,
      max,
      current: initial,
    }
  }

  pub fn next_delay(&mut self) -> Duration {
    let delay = self.current;
    self.current = (self.current * 2).min(self.max);
    delay
  }

  pub fn reset(&mut self) {
    self.current = self.initial;
  }
}

/// What one worker did during its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
  pub index: usize,
  /// Jobs claimed and reported finished
  pub jobs: u64,
  /// Jobs whose processing returned an error
  pub failed: u64,
  pub empty_replies: u64,
}

pub struct Pikeman {
  index: usize,
  client: Client,
  processor: Arc<dyn JobProcessor>,
  backoff: Backoff,
  verbose: bool,
}

impl Pikeman {
  pub fn new(index: usize, client: Client, processor: Arc<dyn JobProcessor>, config: &PoolConfig) -> Self {
    Self {
      index,
      client,
      processor,
      backoff: Backoff::new(config.backoff_initial, config.backoff_max),
      verbose: config.verbose,
    }
  }

  pub async fn run(mut self, stop: CancellationToken) -> WorkerStats {
    let mut stats = WorkerStats {
      index: self.index,
      ..Default::default()
    };
    debug!(worker = self.index, "Pikeman started");

    while !stop.is_cancelled() {
      match self.client.request_job().await {
        Ok(Some(path)) => {
          self.backoff.reset();
          if !self.work(&path).await {
            stats.failed += 1;
          }
          if let Err(e) = self.client.job_finished(&path).await {
            warn!(worker = self.index, path = %path, error = %e, "Failed to report finished job");
            if !matches!(e, IpcError::Rpc { .. }) {
              break;
            }
          }
          stats.jobs += 1;
          continue;
        }
        Ok(None) => stats.empty_replies += 1,
        Err(IpcError::Rpc { code, message }) => {
          warn!(worker = self.index, code, message = %message, "Job request rejected");
        }
        Err(e) => {
          warn!(worker = self.index, error = %e, "Lost scheduler connection");
          break;
        }
      }

      let delay = self.backoff.next_delay();
      tokio::select! {
        _ = stop.cancelled() => break,
        _ = tokio::time::sleep(delay) => {}
      }
    }

    debug!(worker = self.index, jobs = stats.jobs, "Pikeman stopped");
    stats
  }

  /// Process one path. Returns false when processing failed.
  async fn work(&self, path: &str) -> bool {
    if self.verbose {
      info!(worker = self.index, path, "Processing job");
    } else {
      debug!(worker = self.index, path, "Processing job");
    }

    match self.processor.process(path).await {
      Ok(()) => true,
      Err(e) => {
        warn!(worker = self.index, path, error = %e, "Job processing failed");
        false
      }
    }
  }
}
