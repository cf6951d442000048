//! Queue commands: enqueue and status

use std::path::Path;

use anyhow::{Context, Result};
use gatehouse::{config::Config, ipc::Client};

/// Queue one job per path
pub async fn cmd_enqueue(config: &Config, paths: &[String], raw: bool) -> Result<()> {
  let runtime = super::resolve(config)?;
  let mut client = Client::connect(&runtime.scheduler_socket)
    .await
    .with_context(|| format!("Failed to connect to scheduler at {:?}", runtime.scheduler_socket))?;

  for path in paths {
    let path = if raw { path.clone() } else { absolute(path)? };
    client
      .enqueue(&path)
      .await
      .with_context(|| format!("Failed to enqueue {}", path))?;
    println!("Queued {}", path);
  }

  Ok(())
}

/// Print queue and scheduler bookkeeping
pub async fn cmd_status(config: &Config, json: bool) -> Result<()> {
  let runtime = super::resolve(config)?;
  let mut client = match Client::connect(&runtime.scheduler_socket).await {
    Ok(client) => client,
    Err(e) => {
      println!("Daemon:     NOT RUNNING");
      println!("Socket:     {:?}", runtime.scheduler_socket);
      println!("Error:      {}", e);
      std::process::exit(1);
    }
  };

  let status = client.status().await.context("Failed to get status")?;

  if json {
    println!("{}", serde_json::to_string_pretty(&status)?);
    return Ok(());
  }

  println!("Gatehouse Status");
  println!("================\n");
  println!("Socket:     {:?}", runtime.scheduler_socket);
  println!("\n--- Queue ---");
  println!("Total:      {}", status.queue.total);
  println!("Pending:    {}", status.queue.pending);
  println!("Processed:  {}", status.queue.processed);
  println!("\n--- Scheduler ---");
  println!("In flight:  {}", status.in_flight);
  println!("Finished:   {}", status.finished);
  println!("Messages:   {}", status.handled);

  Ok(())
}

/// Workers may run from another directory, so relative paths are resolved
/// against the caller's working directory.
fn absolute(path: &str) -> Result<String> {
  let resolved = std::path::absolute(Path::new(path)).with_context(|| format!("Cannot resolve {}", path))?;
  Ok(resolved.to_string_lossy().into_owned())
}
