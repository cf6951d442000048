//! Run command

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use gatehouse::{Daemon, ShutdownTrigger, config::Config, pool::InspectProcessor};
use tracing::info;

/// Flags on `gatehouse run` that override the config file.
#[derive(Debug, Default)]
pub struct RunOptions {
  pub workers: Option<usize>,
  pub data_dir: Option<PathBuf>,
  pub verbose: bool,
  pub compress: bool,
  pub exit_on_drain: bool,
}

impl RunOptions {
  /// Boolean flags only ever switch a setting on.
  pub fn apply(self, config: &mut Config) {
    if let Some(workers) = self.workers {
      config.workers.count = workers;
    }
    if let Some(data_dir) = self.data_dir {
      config.store.data_dir = Some(data_dir);
    }
    config.daemon.verbose |= self.verbose;
    config.store.compress |= self.compress;
    config.daemon.exit_on_drain |= self.exit_on_drain;
  }
}

/// Run the dispatcher in this process until it is told to stop
pub async fn cmd_run(config: &Config) -> Result<()> {
  let runtime = super::resolve(config)?;
  let daemon = Daemon::new(runtime, Arc::new(InspectProcessor));

  let summary = daemon.run().await.context("Failed to run daemon")?;

  match &summary.trigger {
    ShutdownTrigger::Done { status } => info!(status = status.as_deref(), "Stopped on done"),
    ShutdownTrigger::Interrupted => info!("Stopped on interrupt"),
  }
  if let Some(queue) = summary.queue {
    info!(
      total = queue.total,
      pending = queue.pending,
      processed = queue.processed,
      jobs_this_run = summary.jobs,
      "Final queue state"
    );
  }
  if summary.worker_timeouts > 0 {
    tracing::warn!(count = summary.worker_timeouts, "Workers were aborted at shutdown");
  }

  Ok(())
}
