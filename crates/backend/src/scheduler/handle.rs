//! Handle for sending protocol messages to the scheduler thread.

use tokio::sync::{mpsc, oneshot};

use crate::ipc::{Message, Reply};

/// A message queued for the scheduler, with the slot its reply goes into.
///
/// The scheduler answers `None` for `shutdown`: no reply is sent and the
/// connection that carried it is closed.
#[derive(Debug)]
pub struct SchedulerRequest {
  pub message: Message,
  pub reply: oneshot::Sender<Option<Reply>>,
}

/// Cheap to clone; every connection task holds one.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
  tx: mpsc::Sender<SchedulerRequest>,
}

impl SchedulerHandle {
  pub fn new(tx: mpsc::Sender<SchedulerRequest>) -> Self {
    Self { tx }
  }

  /// Queue `message` and wait until the scheduler has handled it.
  pub async fn request(&self, message: Message) -> Result<Option<Reply>, SendError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let request = SchedulerRequest {
      message,
      reply: reply_tx,
    };
    self.tx.send(request).await.map_err(|_| SendError::Stopped)?;
    reply_rx.await.map_err(|_| SendError::Stopped)
  }

  pub async fn shutdown(&self) -> Result<(), SendError> {
    self.request(Message::shutdown()).await.map(|_| ())
  }

  pub fn is_stopped(&self) -> bool {
    self.tx.is_closed()
  }
}

/// Error when sending to the scheduler
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
  #[error("Scheduler has stopped")]
  Stopped,
}
