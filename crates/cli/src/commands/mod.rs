//! CLI command implementations

mod done;
mod queue;
mod run;

pub use done::cmd_done;
pub use queue::{cmd_enqueue, cmd_status};
pub use run::{RunOptions, cmd_run};

use anyhow::Result;
use gatehouse::{RuntimeConfig, config::Config};

/// Resolve config paths for commands that talk to a running daemon.
fn resolve(config: &Config) -> Result<RuntimeConfig> {
  Ok(RuntimeConfig::from_config(config)?)
}
