//! Test helpers for socket-level integration tests.
//!
//! Provides `DispatchTestContext`, which owns a temporary data directory and
//! a temporary socket directory, and can start a real scheduler endpoint on
//! top of a `redb` store.

use std::{
  path::PathBuf,
  sync::{Arc, Mutex},
  time::Duration,
};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
  RuntimeConfig,
  ipc::Client,
  pool::{JobProcessor, PoolConfig, ProcessError},
  scheduler::{Scheduler, SchedulerConfig, SchedulerHandle, SchedulerServer},
  store::JobStore,
};

/// Test context for scheduler, pool and daemon tests.
pub struct DispatchTestContext {
  /// Temporary directory for `jobs.redb`
  pub data_dir: TempDir,
  /// Temporary directory for both endpoint sockets
  pub socket_dir: TempDir,
}

impl DispatchTestContext {
  pub fn new() -> Self {
    Self {
      data_dir: TempDir::new().expect("create data temp dir"),
      socket_dir: TempDir::new().expect("create socket temp dir"),
    }
  }

  pub fn scheduler_socket(&self) -> PathBuf {
    self.socket_dir.path().join("scheduler.sock")
  }

  pub fn control_socket(&self) -> PathBuf {
    self.socket_dir.path().join("control.sock")
  }

  pub fn open_store(&self) -> JobStore {
    JobStore::open(self.data_dir.path(), false).expect("open job store")
  }

  /// Bind endpoint A and start a scheduler thread behind it.
  pub async fn start_scheduler(&self, config: SchedulerConfig) -> TestScheduler {
    let server = SchedulerServer::bind(&self.scheduler_socket())
      .await
      .expect("bind scheduler socket");
    let stopped = CancellationToken::new();
    let (handle, join) = Scheduler::new(self.open_store(), &config).spawn(stopped.clone());
    let server = tokio::spawn(server.run(handle.clone(), stopped.clone()));

    TestScheduler {
      handle,
      join,
      server,
      stopped,
    }
  }

  pub async fn connect(&self) -> Client {
    Client::connect(&self.scheduler_socket())
      .await
      .expect("connect to scheduler")
  }

  /// Pool settings with short back-off and termination timeout.
  pub fn pool_config(&self) -> PoolConfig {
    PoolConfig {
      backoff_initial: Duration::from_millis(10),
      backoff_max: Duration::from_millis(50),
      terminate_timeout: Duration::from_secs(2),
      ..PoolConfig::new(self.scheduler_socket())
    }
  }

  pub fn runtime_config(&self, workers: usize) -> RuntimeConfig {
    RuntimeConfig {
      data_dir: self.data_dir.path().to_path_buf(),
      scheduler_socket: self.scheduler_socket(),
      control_socket: self.control_socket(),
      workers,
      verbose: true,
      compress: false,
      exit_on_drain: false,
      backoff_initial: Duration::from_millis(10),
      backoff_max: Duration::from_millis(50),
      terminate_timeout: Duration::from_secs(2),
    }
  }
}

/// A scheduler started by [`DispatchTestContext::start_scheduler`].
pub struct TestScheduler {
  pub handle: SchedulerHandle,
  pub join: JoinHandle<JobStore>,
  pub server: JoinHandle<()>,
  /// Cancelled once the scheduler thread exits
  pub stopped: CancellationToken,
}

impl TestScheduler {
  /// Shut down through the handle and return the store.
  pub async fn stop(self) -> JobStore {
    let _ = self.handle.shutdown().await;
    let store = self.join.await.expect("scheduler thread");
    self.server.await.expect("scheduler endpoint task");
    store
  }
}

/// Processor that records every path it is given.
#[derive(Clone, Default)]
pub struct RecordingProcessor {
  seen: Arc<Mutex<Vec<String>>>,
  delay: Duration,
}

impl RecordingProcessor {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sleep this long inside every `process` call.
  pub fn with_delay(delay: Duration) -> Self {
    Self {
      delay,
      ..Self::default()
    }
  }

  pub fn seen(&self) -> Vec<String> {
    self.seen.lock().expect("recording lock").clone()
  }
}

#[async_trait]
impl JobProcessor for RecordingProcessor {
  async fn process(&self, path: &str) -> Result<(), ProcessError> {
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    self.seen.lock().expect("recording lock").push(path.to_string());
    Ok(())
  }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  let start = std::time::Instant::now();
  let poll_interval = Duration::from_millis(20);

  while start.elapsed() < timeout {
    if check().await {
      return true;
    }
    tokio::time::sleep(poll_interval).await;
  }

  false
}
