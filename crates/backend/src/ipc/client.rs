use std::path::Path;

use tokio::net::UnixStream;
use tracing::{debug, trace};

use super::{FramedStream, IpcError, Message, Reply, SchedulerStatus, framed, recv_frame, send_frame};

/// Request/reply connection to a scheduler or control endpoint.
///
/// One request is outstanding at a time: every call writes one frame and
/// waits for exactly one reply frame.
pub struct Client {
  framed: FramedStream,
}

impl Client {
  pub async fn connect(socket_path: &Path) -> Result<Self, IpcError> {
    let stream = UnixStream::connect(socket_path).await?;
    debug!(socket = %socket_path.display(), "Connected");
    Ok(Self { framed: framed(stream) })
  }

  /// Send `message` and wait for its reply.
  ///
  /// Error replies are returned as `Ok(Reply::Error { .. })`; the typed
  /// helpers below turn them into [`IpcError::Rpc`].
  pub async fn call(&mut self, message: &Message) -> Result<Reply, IpcError> {
    trace!(kind = ?message.kind(), "Sending request");
    send_frame(&mut self.framed, message).await?;
    recv_frame(&mut self.framed).await?.ok_or(IpcError::Closed)
  }

  /// Ask for the next job. `None` when the queue has nothing unprocessed.
  pub async fn request_job(&mut self) -> Result<Option<String>, IpcError> {
    match self.call(&Message::job_request()).await?.into_result()? {
      Reply::Job { path } => Ok(Some(path)),
      Reply::NoJob => Ok(None),
      other => Err(unexpected(other)),
    }
  }

  pub async fn enqueue(&mut self, path: &str) -> Result<(), IpcError> {
    let reply = self.call(&Message::enqueue(path)).await?;
    expect_ack(reply)
  }

  pub async fn job_finished(&mut self, path: &str) -> Result<(), IpcError> {
    let reply = self.call(&Message::job_finished(path)).await?;
    expect_ack(reply)
  }

  pub async fn status(&mut self) -> Result<SchedulerStatus, IpcError> {
    match self.call(&Message::status()).await?.into_result()? {
      Reply::Status(status) => Ok(status),
      other => Err(unexpected(other)),
    }
  }

  /// Tell the main loop that all queued work has been drained.
  pub async fn done(&mut self, status: Option<&str>) -> Result<(), IpcError> {
    let reply = self.call(&Message::done(status)).await?;
    expect_ack(reply)
  }

  /// Stop the scheduler.
  ///
  /// No reply is sent for `shutdown`; this returns once the scheduler has
  /// closed the connection.
  pub async fn shutdown(mut self) -> Result<(), IpcError> {
    send_frame(&mut self.framed, &Message::shutdown()).await?;
    match recv_frame::<Reply>(&mut self.framed).await {
      Ok(None) | Err(IpcError::Io(_)) => Ok(()),
      Ok(Some(reply)) => Err(unexpected(reply)),
      Err(e) => Err(e),
    }
  }
}

fn expect_ack(reply: Reply) -> Result<(), IpcError> {
  match reply.into_result()? {
    Reply::Ack => Ok(()),
    other => Err(unexpected(other)),
  }
}

fn unexpected(reply: Reply) -> IpcError {
  IpcError::Unexpected(format!("{:?}", reply))
}
