//! Daemon lifecycle: the main loop that owns one run of the dispatcher.
//!
//! # Architecture
//!
//! ```text
//! Daemon (main loop)
//!   ├── JobStore (opened first, closed last)
//!   ├── Scheduler thread  ◀── SchedulerServer (endpoint A)
//!   ├── WorkerPool ── N pikemen, each with its own connection to A
//!   └── ControlServer (endpoint B, waits for one `done`)
//! ```
//!
//! # Lifecycle
//!
//! 1. Open the `JobStore`
//! 2. Bind endpoint A and start the scheduler on its own thread
//! 3. Bind endpoint B
//! 4. Spawn the worker pool
//! 5. Wait for `done` on B (ctrl-c counts as `done`)
//! 6. Terminate the pool, shut the scheduler down, close the store

use std::{path::PathBuf, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{signal, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
  config::{Config, ConfigError},
  dirs,
  domain::QueueStats,
  ipc::IpcError,
  pool::{JobProcessor, PoolConfig, PoolError, WorkerPool},
  scheduler::{Scheduler, SchedulerConfig, SchedulerHandle, SchedulerServer},
  store::{JobStore, StoreError},
};

pub mod control;

pub use control::{ControlServer, ShutdownTrigger};

#[derive(Error, Debug)]
pub enum DaemonError {
  #[error("Failed to open job store: {0}")]
  StoreOpen(#[source] StoreError),
  #[error("Failed to bind {socket:?}: {source}")]
  Bind {
    socket: PathBuf,
    #[source]
    source: IpcError,
  },
  #[error(transparent)]
  Pool(#[from] PoolError),
  #[error("Scheduler thread panicked: {0}")]
  SchedulerPanicked(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Everything one run needs, with every optional path resolved.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  /// Directory holding `jobs.redb` (and the log files in background mode)
  pub data_dir: PathBuf,
  /// Endpoint A
  pub scheduler_socket: PathBuf,
  /// Endpoint B
  pub control_socket: PathBuf,
  pub workers: usize,
  pub verbose: bool,
  pub compress: bool,
  pub exit_on_drain: bool,
  pub backoff_initial: Duration,
  pub backoff_max: Duration,
  pub terminate_timeout: Duration,
}

impl RuntimeConfig {
  pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
    config.validate()?;

    Ok(Self {
      data_dir: config.store.data_dir.clone().unwrap_or_else(dirs::default_data_dir),
      scheduler_socket: config
        .daemon
        .scheduler_socket
        .clone()
        .unwrap_or_else(dirs::default_scheduler_socket),
      control_socket: config
        .daemon
        .control_socket
        .clone()
        .unwrap_or_else(dirs::default_control_socket),
      workers: config.workers.count,
      verbose: config.daemon.verbose,
      compress: config.store.compress,
      exit_on_drain: config.daemon.exit_on_drain,
      backoff_initial: Duration::from_millis(config.workers.backoff_initial_ms),
      backoff_max: Duration::from_millis(config.workers.backoff_max_ms),
      terminate_timeout: Duration::from_secs(config.workers.terminate_timeout_secs),
    })
  }

  pub fn scheduler_config(&self) -> SchedulerConfig {
    SchedulerConfig {
      verbose: self.verbose,
      drain_notify: self.exit_on_drain.then(|| self.control_socket.clone()),
    }
  }

  pub fn pool_config(&self) -> PoolConfig {
    PoolConfig {
      scheduler_socket: self.scheduler_socket.clone(),
      backoff_initial: self.backoff_initial,
      backoff_max: self.backoff_max,
      terminate_timeout: self.terminate_timeout,
      verbose: self.verbose,
    }
  }
}

/// What a finished run looked like.
#[derive(Debug, Clone)]
pub struct RunSummary {
  pub trigger: ShutdownTrigger,
  /// Queue stats read just before the store was closed
  pub queue: Option<QueueStats>,
  /// Jobs completed by workers that stopped on their own
  pub jobs: u64,
  /// Workers aborted at the termination deadline
  pub worker_timeouts: usize,
}

// ============================================================================
// Main loop
// ============================================================================

pub struct Daemon {
  config: RuntimeConfig,
  processor: Arc<dyn JobProcessor>,
}

impl Daemon {
  pub fn new(config: RuntimeConfig, processor: Arc<dyn JobProcessor>) -> Self {
    Self { config, processor }
  }

  /// Run until `done` arrives on the control endpoint or ctrl-c.
  pub async fn run(self) -> Result<RunSummary, DaemonError> {
    let interrupt = CancellationToken::new();

    let cancel_for_signal = interrupt.clone();
    tokio::spawn(async move {
      if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        return;
      }
      info!("Received ctrl-c, shutting down...");
      cancel_for_signal.cancel();
    });

    self.run_until(interrupt).await
  }

  /// Run until `done` arrives on the control endpoint or `interrupt` fires.
  pub async fn run_until(self, interrupt: CancellationToken) -> Result<RunSummary, DaemonError> {
    let Self { config, processor } = self;

    info!("Starting gatehouse daemon");
    info!(
      data_dir = %config.data_dir.display(),
      scheduler = %config.scheduler_socket.display(),
      control = %config.control_socket.display(),
      workers = config.workers,
      "Daemon configuration"
    );

    let store = JobStore::open(&config.data_dir, config.compress).map_err(DaemonError::StoreOpen)?;

    let server = match SchedulerServer::bind(&config.scheduler_socket).await {
      Ok(server) => server,
      Err(source) => {
        store.close();
        return Err(DaemonError::Bind {
          socket: config.scheduler_socket.clone(),
          source,
        });
      }
    };

    // Cancelled by the scheduler thread on exit; stops endpoint A with it.
    let stopped = CancellationToken::new();
    let (scheduler, scheduler_join) = Scheduler::new(store, &config.scheduler_config()).spawn(stopped.clone());
    let server_task = tokio::spawn(server.run(scheduler.clone(), stopped));

    let running = RunningScheduler {
      handle: scheduler,
      join: scheduler_join,
      server: server_task,
    };

    let control = match ControlServer::bind(&config.control_socket).await {
      Ok(control) => control,
      Err(source) => {
        running.stop().await?.close();
        return Err(DaemonError::Bind {
          socket: config.control_socket.clone(),
          source,
        });
      }
    };

    let pool = WorkerPool::new(config.pool_config(), processor);
    let workers = match pool.spawn(config.workers).await {
      Ok(workers) => workers,
      Err(e) => {
        error!(error = %e, "Failed to start worker pool");
        control.close().await;
        running.stop().await?.close();
        return Err(e.into());
      }
    };

    info!("Daemon running, waiting for done");
    let trigger = control.wait_for_done(interrupt).await;

    info!("Shutting down...");
    let report = WorkerPool::terminate(workers).await;
    let store = running.stop().await?;

    let queue = match store.stats() {
      Ok(stats) => Some(stats),
      Err(e) => {
        warn!(error = %e, "Could not read final queue stats");
        None
      }
    };
    store.close();

    let summary = RunSummary {
      trigger,
      queue,
      jobs: report.jobs(),
      worker_timeouts: report.timeouts.len(),
    };
    info!(
      jobs = summary.jobs,
      worker_timeouts = summary.worker_timeouts,
      "Daemon shutdown complete"
    );
    Ok(summary)
  }
}

/// The scheduler thread plus the endpoint task feeding it.
struct RunningScheduler {
  handle: SchedulerHandle,
  join: JoinHandle<JobStore>,
  server: JoinHandle<()>,
}

impl RunningScheduler {
  /// Send `shutdown`, join the thread, and hand back the store.
  async fn stop(self) -> Result<JobStore, DaemonError> {
    if self.handle.shutdown().await.is_err() {
      debug!("Scheduler already stopped");
    }
    drop(self.handle);

    let store = self
      .join
      .await
      .map_err(|e| DaemonError::SchedulerPanicked(e.to_string()))?;

    if let Err(e) = self.server.await {
      warn!(error = %e, "Scheduler endpoint task failed");
    }
    Ok(store)
  }
}
