//! The scheduler: sole owner of the job queue.
//!
//! [`Scheduler`] is a small state machine (`Listening` until a `shutdown`
//! message, then `Stopped`). It runs on a dedicated blocking thread and
//! takes messages from an mpsc queue one at a time, so every queue mutation
//! (a full load-modify-save against the store) finishes before the next
//! message is looked at. That single-consumer queue is the only
//! concurrency control the job list has.
//!
//! ```text
//! worker ─┐
//! worker ─┼─ SchedulerServer ── SchedulerHandle ──▶ Scheduler thread ──▶ JobStore
//! enqueue ┘      (socket)          (mpsc)
//! ```

use std::{collections::HashMap, path::PathBuf};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
  ipc::{Client, Message, MessageType, Reply, SchedulerStatus, codes},
  store::{JobStore, StoreError},
};

pub mod handle;
pub mod server;

pub use handle::{SchedulerHandle, SchedulerRequest, SendError};
pub use server::SchedulerServer;

/// Capacity of the queue between connection tasks and the scheduler thread.
const REQUEST_QUEUE_SIZE: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
  /// Log every protocol message at `info` instead of `debug`
  pub verbose: bool,
  /// Control socket to send `done` to once the queue drains
  pub drain_notify: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
  Listening,
  Stopped,
}

/// What the scheduler does after handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
  Reply(Reply),
  Stop,
}

pub struct Scheduler {
  store: JobStore,
  state: SchedulerState,
  verbose: bool,
  drain_notify: Option<PathBuf>,
  /// Paths handed out by `job_request` and not yet reported finished
  in_flight: HashMap<String, usize>,
  finished: u64,
  handled: u64,
  drained_tx: Option<mpsc::UnboundedSender<()>>,
}

impl Scheduler {
  pub fn new(store: JobStore, config: &SchedulerConfig) -> Self {
    Self {
      store,
      state: SchedulerState::Listening,
      verbose: config.verbose,
      drain_notify: config.drain_notify.clone(),
      in_flight: HashMap::new(),
      finished: 0,
      handled: 0,
      drained_tx: None,
    }
  }

  pub fn state(&self) -> SchedulerState {
    self.state
  }

  /// Receive a notice the first time a `job_finished` leaves nothing pending
  /// and nothing in flight.
  pub(crate) fn watch_drain(&mut self) -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    self.drained_tx = Some(tx);
    rx
  }

  /// Interpret one message against the protocol.
  pub fn handle(&mut self, message: &Message) -> Step {
    if self.state == SchedulerState::Stopped {
      return Step::Stop;
    }
    self.handled += 1;

    let Some(raw_kind) = message.kind() else {
      warn!("Message without a type");
      return Step::Reply(Reply::invalid_request("Message has no 'type' field"));
    };
    let Some(kind) = MessageType::parse(raw_kind) else {
      warn!(kind = raw_kind, "Unknown message type");
      return Step::Reply(Reply::method_not_found(raw_kind));
    };

    if self.verbose {
      info!(kind = %kind, path = message.path(), "Scheduler received message");
    } else {
      debug!(kind = %kind, path = message.path(), "Scheduler received message");
    }

    let reply = match kind {
      MessageType::JobRequest => self.job_request(),
      // An empty path is never queued; old lists may still hold one
      MessageType::Enqueue => match message.path() {
        Some(path) if !path.is_empty() => self.enqueue(path),
        _ => Reply::missing_path(kind),
      },
      MessageType::JobFinished => match message.path() {
        Some(path) => self.job_finished(path),
        None => Reply::missing_path(kind),
      },
      MessageType::Status => self.status(),
      MessageType::Shutdown => {
        info!("Scheduler received shutdown");
        self.state = SchedulerState::Stopped;
        return Step::Stop;
      }
      MessageType::Done => Reply::method_not_found(raw_kind),
    };

    Step::Reply(reply)
  }

  fn job_request(&mut self) -> Reply {
    match self.store.claim_next() {
      Ok(Some(path)) => {
        *self.in_flight.entry(path.clone()).or_default() += 1;
        Reply::job(Some(path))
      }
      Ok(None) => Reply::job(None),
      Err(e) => store_error_reply(e),
    }
  }

  fn enqueue(&mut self, path: &str) -> Reply {
    match self.store.append(path) {
      Ok(()) => Reply::Ack,
      Err(e) => store_error_reply(e),
    }
  }

  fn job_finished(&mut self, path: &str) -> Reply {
    match self.in_flight.get_mut(path) {
      Some(count) if *count > 1 => *count -= 1,
      Some(_) => {
        self.in_flight.remove(path);
      }
      None => warn!(path, "Finished job was not in flight"),
    }
    self.finished += 1;
    self.check_drained();
    Reply::Ack
  }

  fn status(&self) -> Reply {
    match self.store.stats() {
      Ok(queue) => Reply::Status(SchedulerStatus {
        queue,
        in_flight: self.in_flight.values().sum(),
        finished: self.finished,
        handled: self.handled,
      }),
      Err(e) => store_error_reply(e),
    }
  }

  fn check_drained(&mut self) {
    if self.drained_tx.is_none() || !self.in_flight.is_empty() {
      return;
    }

    match self.store.stats() {
      Ok(stats) if stats.pending == 0 => {
        info!(finished = self.finished, "Queue drained");
        if let Some(tx) = self.drained_tx.take() {
          let _ = tx.send(());
        }
      }
      Ok(_) => {}
      Err(e) => warn!(error = %e, "Could not check whether the queue drained"),
    }
  }

  /// Handle messages until `shutdown` arrives or every handle is dropped.
  ///
  /// Blocks the calling thread. Returns the store so the caller decides
  /// when to close it.
  pub fn run(mut self, mut rx: mpsc::Receiver<SchedulerRequest>) -> JobStore {
    info!("Scheduler listening");

    while let Some(request) = rx.blocking_recv() {
      match self.handle(&request.message) {
        Step::Reply(reply) => {
          let _ = request.reply.send(Some(reply));
        }
        Step::Stop => {
          let _ = request.reply.send(None);
          break;
        }
      }
    }

    rx.close();
    self.state = SchedulerState::Stopped;
    info!(handled = self.handled, finished = self.finished, "Scheduler stopped");
    self.store
  }

  /// Start the scheduler on its own blocking thread.
  ///
  /// `stopped` is cancelled when the thread exits, for any reason.
  pub fn spawn(mut self, stopped: CancellationToken) -> (SchedulerHandle, JoinHandle<JobStore>) {
    if let Some(socket) = self.drain_notify.clone() {
      let drained = self.watch_drain();
      tokio::spawn(notify_drained(socket, drained));
    }

    let (tx, rx) = mpsc::channel(REQUEST_QUEUE_SIZE);
    let join = tokio::task::spawn_blocking(move || {
      let _stopped = stopped.drop_guard();
      self.run(rx)
    });

    (SchedulerHandle::new(tx), join)
  }
}

async fn notify_drained(socket: PathBuf, mut drained: mpsc::UnboundedReceiver<()>) {
  if drained.recv().await.is_none() {
    return;
  }

  let result = match Client::connect(&socket).await {
    Ok(mut client) => client.done(Some("drained")).await,
    Err(e) => Err(e),
  };
  match result {
    Ok(()) => info!(socket = %socket.display(), "Sent done to main loop"),
    Err(e) => error!(socket = %socket.display(), error = %e, "Failed to send done to main loop"),
  }
}

fn store_error_reply(err: StoreError) -> Reply {
  error!(error = %err, "Queue operation failed");
  let code = match &err {
    StoreError::CorruptData { .. } => codes::CORRUPT_DATA,
    StoreError::Write(_) | StoreError::Encode(_) => codes::STORE_WRITE,
    StoreError::Read(_) => codes::STORE_READ,
    StoreError::Open { .. } => codes::INTERNAL,
  };
  Reply::error(code, err.to_string())
}
