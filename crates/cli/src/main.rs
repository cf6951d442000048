//! gatehouse CLI - durable single-node job dispatch

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gatehouse::config::Config;
use std::path::PathBuf;

mod commands;
mod logging;

use commands::{RunOptions, cmd_done, cmd_enqueue, cmd_run, cmd_status};
use logging::{init_cli_logging, init_daemon_logging};

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "Durable single-node job dispatch with a fixed worker pool")]
#[command(after_help = "\
QUICK START:
  gatehouse run                   # Start scheduler and workers
  gatehouse enqueue a.txt b.txt   # Queue files for processing
  gatehouse status                # Show queue and worker bookkeeping
  gatehouse done                  # Stop the running daemon

DRAIN AND EXIT:
  gatehouse run --exit-on-drain   # Stop once every queued job is finished")]
struct Cli {
  /// Config file (default: <config_dir>/config.toml)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,
  /// Scheduler endpoint socket
  #[arg(long, global = true, value_name = "PATH")]
  scheduler_socket: Option<PathBuf>,
  /// Main loop control endpoint socket
  #[arg(long, global = true, value_name = "PATH")]
  control_socket: Option<PathBuf>,
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the dispatcher until `done` arrives or ctrl-c
  Run {
    /// Number of workers (overrides workers.count)
    #[arg(short, long)]
    workers: Option<usize>,
    /// Directory holding the job database
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    /// Log every protocol message and job
    #[arg(short, long)]
    verbose: bool,
    /// zlib-compress the stored job list
    #[arg(long)]
    compress: bool,
    /// Stop once all queued work is finished
    #[arg(long)]
    exit_on_drain: bool,
    /// Log to a rolling file in the data directory instead of the console
    #[arg(long)]
    background: bool,
  },
  /// Add one job per path to the queue
  Enqueue {
    /// Paths to queue, in order
    #[arg(required = true)]
    paths: Vec<String>,
    /// Queue paths exactly as given instead of making them absolute
    #[arg(long)]
    raw: bool,
  },
  /// Tell the running daemon to shut down
  Done {
    /// Free-form status recorded in the daemon log
    #[arg(long)]
    status: Option<String>,
  },
  /// Show queue and scheduler status
  Status {
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  let mut config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
  if let Some(socket) = cli.scheduler_socket {
    config.daemon.scheduler_socket = Some(socket);
  }
  if let Some(socket) = cli.control_socket {
    config.daemon.control_socket = Some(socket);
  }

  match cli.command {
    Commands::Run {
      workers,
      data_dir,
      verbose,
      compress,
      exit_on_drain,
      background,
    } => {
      let options = RunOptions {
        workers,
        data_dir,
        verbose,
        compress,
        exit_on_drain,
      };
      options.apply(&mut config);

      // Guard flushes the file writer; keep it for the whole run
      let _guard = init_daemon_logging(&config, !background);
      cmd_run(&config).await
    }
    Commands::Enqueue { paths, raw } => {
      init_cli_logging();
      cmd_enqueue(&config, &paths, raw).await
    }
    Commands::Done { status } => {
      init_cli_logging();
      cmd_done(&config, status.as_deref()).await
    }
    Commands::Status { json } => {
      init_cli_logging();
      cmd_status(&config, json).await
    }
  }
}
