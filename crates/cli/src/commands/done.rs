//! Done command

use anyhow::{Context, Result};
use gatehouse::{config::Config, ipc::Client};

/// Send `done` to the main loop of a running daemon
pub async fn cmd_done(config: &Config, status: Option<&str>) -> Result<()> {
  let runtime = super::resolve(config)?;
  let mut client = Client::connect(&runtime.control_socket)
    .await
    .with_context(|| format!("Failed to connect to control socket at {:?}", runtime.control_socket))?;

  client.done(status).await.context("Daemon rejected done")?;
  println!("Daemon is shutting down");
  Ok(())
}
