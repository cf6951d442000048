//! Scheduler endpoint: accepts worker and producer connections on a Unix
//! socket and forwards each decoded message to the scheduler thread.
//!
//! Connections are served concurrently, but every message funnels through
//! the single [`SchedulerHandle`] queue, so the queue sees them one at a time.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handle::SchedulerHandle;
use crate::{
  codec,
  ipc::{self, IpcError, Message, Reply},
};

pub struct SchedulerServer {
  listener: UnixListener,
  socket_path: PathBuf,
}

impl SchedulerServer {
  /// Bind the endpoint. Binding happens before any worker is spawned so
  /// workers never race the listener.
  pub async fn bind(socket_path: &Path) -> Result<Self, IpcError> {
    let listener = ipc::bind(socket_path).await?;
    info!(socket = %socket_path.display(), "Scheduler endpoint bound");
    Ok(Self {
      listener,
      socket_path: socket_path.to_path_buf(),
    })
  }

  /// Accept connections until `cancel` fires, then remove the socket file.
  ///
  /// The scheduler thread cancels the token when it stops, which also
  /// closes every open connection.
  pub async fn run(self, handle: SchedulerHandle, cancel: CancellationToken) {
    let Self { listener, socket_path } = self;

    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!("Scheduler endpoint shutting down");
          break;
        }

        result = listener.accept() => {
          match result {
            Ok((stream, _)) => {
              tokio::spawn(handle_connection(stream, handle.clone(), cancel.clone()));
            }
            Err(e) => {
              error!("Accept error: {}", e);
            }
          }
        }
      }
    }

    drop(listener);
    ipc::remove_socket(&socket_path).await;
  }
}

/// Serve one connection, strictly request-then-reply.
///
/// - Undecodable frames get an error reply and the connection stays open
/// - `shutdown` gets no reply; the connection is closed
/// - Once the scheduler has stopped, the connection is closed unanswered
async fn handle_connection(stream: UnixStream, handle: SchedulerHandle, cancel: CancellationToken) {
  debug!("Client connected");
  let mut framed = ipc::framed(stream);
  let mut handled = 0u64;

  loop {
    let frame = tokio::select! {
      biased;

      _ = cancel.cancelled() => break,
      frame = framed.next() => frame,
    };

    let bytes = match frame {
      Some(Ok(bytes)) => bytes,
      Some(Err(e)) => {
        warn!(error = %e, "Error reading from client");
        break;
      }
      None => break,
    };

    let reply = match codec::decode::<Message>(&bytes) {
      Ok(message) => match handle.request(message).await {
        Ok(Some(reply)) => reply,
        Ok(None) | Err(_) => break,
      },
      Err(e) => {
        warn!("Malformed message: {}", e);
        Reply::invalid_request(format!("Malformed message: {}", e))
      }
    };

    if let Err(e) = ipc::send_frame(&mut framed, &reply).await {
      warn!(error = %e, "Failed to send reply");
      break;
    }
    handled += 1;
  }

  debug!(requests_handled = handled, "Client disconnected");
}
