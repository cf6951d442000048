//! Worker pool - a fixed number of pikemen for one daemon run
//!
//! [`WorkerPool::spawn`] connects every worker to the scheduler endpoint
//! before returning; if one cannot connect, the ones already running are
//! torn down and no partial pool is left behind. [`PoolHandle::terminate`]
//! raises the shared stop signal and waits, up to a deadline, for each
//! worker to finish its current job. Stragglers are aborted.

use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ipc::{Client, IpcError};

pub mod pikeman;
pub mod processor;

pub use pikeman::{Backoff, Pikeman, WorkerStats};
pub use processor::{InspectProcessor, JobProcessor, ProcessError};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
  #[error("Worker pool size must be positive")]
  InvalidSize,
  #[error("Worker {index} failed to start: {source}")]
  WorkerSpawn {
    index: usize,
    #[source]
    source: IpcError,
  },
  #[error("Worker {index} did not stop within {timeout:?}")]
  WorkerTimeout { index: usize, timeout: Duration },
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
  pub scheduler_socket: PathBuf,
  pub backoff_initial: Duration,
  pub backoff_max: Duration,
  /// How long `terminate` waits for workers before aborting them
  pub terminate_timeout: Duration,
  pub verbose: bool,
}

impl PoolConfig {
  pub fn new(scheduler_socket: impl Into<PathBuf>) -> Self {
    Self {
      scheduler_socket: scheduler_socket.into(),
      backoff_initial: Duration::from_millis(100),
      backoff_max: Duration::from_secs(2),
      terminate_timeout: Duration::from_secs(10),
      verbose: false,
    }
  }
}

pub struct WorkerPool {
  config: PoolConfig,
  processor: Arc<dyn JobProcessor>,
}

impl WorkerPool {
  pub fn new(config: PoolConfig, processor: Arc<dyn JobProcessor>) -> Self {
    Self { config, processor }
  }

  /// Start `n` workers, each on its own task with its own connection.
  pub async fn spawn(&self, n: usize) -> Result<PoolHandle, PoolError> {
    if n == 0 {
      return Err(PoolError::InvalidSize);
    }

    let mut handle = PoolHandle {
      workers: Vec::with_capacity(n),
      stop: CancellationToken::new(),
      timeout: self.config.terminate_timeout,
    };

    for index in 0..n {
      let client = match Client::connect(&self.config.scheduler_socket).await {
        Ok(client) => client,
        Err(source) => {
          error!(worker = index, error = %source, "Worker failed to start, tearing down pool");
          handle.terminate().await;
          return Err(PoolError::WorkerSpawn { index, source });
        }
      };

      let pikeman = Pikeman::new(index, client, Arc::clone(&self.processor), &self.config);
      let join = tokio::spawn(pikeman.run(handle.stop.clone()));
      handle.workers.push(WorkerUnit { index, join });
    }

    info!(workers = n, socket = %self.config.scheduler_socket.display(), "Worker pool started");
    Ok(handle)
  }

  pub async fn terminate(handle: PoolHandle) -> TerminationReport {
    handle.terminate().await
  }
}

struct WorkerUnit {
  index: usize,
  join: JoinHandle<WorkerStats>,
}

/// Running pool. Dropping it without [`terminate`](Self::terminate) leaves
/// the workers running until the scheduler goes away.
pub struct PoolHandle {
  workers: Vec<WorkerUnit>,
  stop: CancellationToken,
  timeout: Duration,
}

/// Outcome of [`PoolHandle::terminate`].
#[derive(Debug, Default)]
pub struct TerminationReport {
  /// Stats of every worker that exited on its own
  pub workers: Vec<WorkerStats>,
  /// Workers that had to be aborted
  pub timeouts: Vec<PoolError>,
}

impl TerminationReport {
  pub fn jobs(&self) -> u64 {
    self.workers.iter().map(|w| w.jobs).sum()
  }
}

impl PoolHandle {
  pub fn len(&self) -> usize {
    self.workers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.workers.is_empty()
  }

  /// Signal every worker to stop after its current job and wait for them.
  ///
  /// All workers share one deadline. A worker still running at the deadline
  /// is aborted and reported as [`PoolError::WorkerTimeout`].
  pub async fn terminate(self) -> TerminationReport {
    self.stop.cancel();
    let deadline = Instant::now() + self.timeout;
    let mut report = TerminationReport::default();

    for WorkerUnit { index, mut join } in self.workers {
      match tokio::time::timeout_at(deadline, &mut join).await {
        Ok(Ok(stats)) => report.workers.push(stats),
        Ok(Err(e)) => error!(worker = index, error = %e, "Worker task failed"),
        Err(_) => {
          join.abort();
          let err = PoolError::WorkerTimeout {
            index,
            timeout: self.timeout,
          };
          warn!("{}", err);
          report.timeouts.push(err);
        }
      }
    }

    info!(
      stopped = report.workers.len(),
      aborted = report.timeouts.len(),
      jobs = report.jobs(),
      "Worker pool terminated"
    );
    report
  }
}
