//! Control endpoint: the main loop waits here for exactly one `done`.
//!
//! Each connection is served on its own task so a client that connects and
//! goes quiet cannot hold up a `done` from another one (for example the
//! scheduler's drain notice).

use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::{
  net::{UnixListener, UnixStream},
  sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
  codec,
  ipc::{self, IpcError, Message, MessageType, Reply},
};

/// Why the main loop stopped waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTrigger {
  /// A `done` message arrived, with its optional `status` field
  Done { status: Option<String> },
  /// The interrupt token fired (ctrl-c)
  Interrupted,
}

pub struct ControlServer {
  listener: UnixListener,
  socket_path: PathBuf,
}

impl ControlServer {
  pub async fn bind(socket_path: &Path) -> Result<Self, IpcError> {
    let listener = ipc::bind(socket_path).await?;
    info!(socket = %socket_path.display(), "Control endpoint bound");
    Ok(Self {
      listener,
      socket_path: socket_path.to_path_buf(),
    })
  }

  /// Block until the first `done` message or until `interrupt` fires.
  ///
  /// The socket file is removed before returning; later `done` messages
  /// have nowhere to go.
  pub async fn wait_for_done(self, interrupt: CancellationToken) -> ShutdownTrigger {
    let Self { listener, socket_path } = self;
    let (done_tx, mut done_rx) = mpsc::channel::<Option<String>>(1);
    let closing = CancellationToken::new();

    let trigger = loop {
      tokio::select! {
        biased;

        _ = interrupt.cancelled() => {
          info!("Interrupted while waiting for done");
          break ShutdownTrigger::Interrupted;
        }

        Some(status) = done_rx.recv() => {
          info!(status = status.as_deref(), "Received done");
          break ShutdownTrigger::Done { status };
        }

        result = listener.accept() => {
          match result {
            Ok((stream, _)) => {
              tokio::spawn(handle_connection(stream, done_tx.clone(), closing.clone()));
            }
            Err(e) => {
              error!("Accept error: {}", e);
            }
          }
        }
      }
    };

    closing.cancel();
    drop(listener);
    ipc::remove_socket(&socket_path).await;
    trigger
  }

  /// Release the endpoint without waiting.
  pub async fn close(self) {
    drop(self.listener);
    ipc::remove_socket(&self.socket_path).await;
  }
}

async fn handle_connection(stream: UnixStream, done_tx: mpsc::Sender<Option<String>>, closing: CancellationToken) {
  debug!("Control client connected");
  let mut framed = ipc::framed(stream);

  loop {
    let bytes = tokio::select! {
      biased;

      _ = closing.cancelled() => break,
      frame = framed.next() => match frame {
        Some(Ok(bytes)) => bytes,
        Some(Err(e)) => {
          warn!(error = %e, "Error reading from control client");
          break;
        }
        None => break,
      },
    };

    let (reply, done) = match codec::decode::<Message>(&bytes) {
      Ok(message) => match message.kind().map(|kind| (kind, MessageType::parse(kind))) {
        Some((_, Some(MessageType::Done))) => (Reply::Ack, Some(message.get(Message::STATUS).map(str::to_string))),
        Some((kind, _)) => {
          warn!(kind, "Control endpoint only accepts done");
          (Reply::method_not_found(kind), None)
        }
        None => (Reply::invalid_request("Message has no 'type' field"), None),
      },
      Err(e) => (Reply::invalid_request(format!("Malformed message: {}", e)), None),
    };

    if let Err(e) = ipc::send_frame(&mut framed, &reply).await {
      warn!(error = %e, "Failed to send control reply");
      break;
    }

    if let Some(status) = done {
      let _ = done_tx.send(status).await;
      break;
    }
  }
}
