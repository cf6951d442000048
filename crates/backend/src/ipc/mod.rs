//! IPC module - wire protocol shared by the scheduler and control endpoints
//!
//! Both endpoints are Unix sockets carrying length-delimited frames. A
//! request frame holds a string-keyed [`Message`]; the `type` key selects the
//! operation. A reply frame holds a [`Reply`]. Every connection is strictly
//! request-then-reply with one outstanding request.

use std::{collections::BTreeMap, fmt, path::Path};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::{
  codec::{self, CodecError, MAX_ENCODED_LEN},
  domain::QueueStats,
};

pub mod client;

pub use client::Client;

#[derive(Debug, Clone, thiserror::Error)]
pub enum IpcError {
  #[error("Codec error: {0}")]
  Codec(String),
  #[error("IO error: {0}")]
  Io(String),
  #[error("RPC error {code}: {message}")]
  Rpc { code: i32, message: String },
  #[error("Connection closed")]
  Closed,
  #[error("Unexpected reply: {0}")]
  Unexpected(String),
}

impl From<CodecError> for IpcError {
  fn from(err: CodecError) -> Self {
    IpcError::Codec(err.to_string())
  }
}

impl From<std::io::Error> for IpcError {
  fn from(err: std::io::Error) -> Self {
    IpcError::Io(err.to_string())
  }
}

/// Error codes carried by [`Reply::Error`].
pub mod codes {
  /// Frame did not decode, or the message has no `type`
  pub const INVALID_REQUEST: i32 = -32600;
  /// Unrecognized `type`
  pub const METHOD_NOT_FOUND: i32 = -32601;
  /// Required field (`path`) missing
  pub const INVALID_PARAMS: i32 = -32602;
  pub const CORRUPT_DATA: i32 = -32010;
  pub const STORE_WRITE: i32 = -32011;
  pub const STORE_READ: i32 = -32012;
  pub const INTERNAL: i32 = -32000;
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
  JobRequest,
  Enqueue,
  JobFinished,
  Shutdown,
  Status,
  Done,
}

impl MessageType {
  pub fn as_str(self) -> &'static str {
    match self {
      MessageType::JobRequest => "job_request",
      MessageType::Enqueue => "enqueue",
      MessageType::JobFinished => "job_finished",
      MessageType::Shutdown => "shutdown",
      MessageType::Status => "status",
      MessageType::Done => "done",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "job_request" => Some(MessageType::JobRequest),
      "enqueue" => Some(MessageType::Enqueue),
      "job_finished" => Some(MessageType::JobFinished),
      "shutdown" => Some(MessageType::Shutdown),
      "status" => Some(MessageType::Status),
      "done" => Some(MessageType::Done),
      _ => None,
    }
  }
}

impl fmt::Display for MessageType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A string-keyed protocol message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(BTreeMap<String, String>);

impl Message {
  pub const TYPE: &'static str = "type";
  pub const PATH: &'static str = "path";
  pub const STATUS: &'static str = "status";

  pub fn new(kind: MessageType) -> Self {
    Self::default().with(Self::TYPE, kind.as_str())
  }

  pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.0.insert(key.into(), value.into());
    self
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.0.get(key).map(String::as_str)
  }

  /// Raw value of the `type` field.
  pub fn kind(&self) -> Option<&str> {
    self.get(Self::TYPE)
  }

  pub fn path(&self) -> Option<&str> {
    self.get(Self::PATH)
  }

  pub fn job_request() -> Self {
    Self::new(MessageType::JobRequest)
  }

  pub fn enqueue(path: impl Into<String>) -> Self {
    Self::new(MessageType::Enqueue).with(Self::PATH, path)
  }

  pub fn job_finished(path: impl Into<String>) -> Self {
    Self::new(MessageType::JobFinished).with(Self::PATH, path)
  }

  pub fn shutdown() -> Self {
    Self::new(MessageType::Shutdown)
  }

  pub fn status() -> Self {
    Self::new(MessageType::Status)
  }

  pub fn done(status: Option<&str>) -> Self {
    let message = Self::new(MessageType::Done);
    match status {
      Some(status) => message.with(Self::STATUS, status),
      None => message,
    }
  }
}

// ============================================================================
// Replies
// ============================================================================

/// Scheduler bookkeeping returned for a `status` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
  pub queue: QueueStats,
  /// Paths handed out and not yet reported finished
  pub in_flight: usize,
  /// `job_finished` messages received
  pub finished: u64,
  /// Messages handled since the scheduler started
  pub handled: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
  /// Reply to `job_request` carrying the claimed path
  Job { path: String },
  /// Reply to `job_request` when no unprocessed job is left
  NoJob,
  Ack,
  Status(SchedulerStatus),
  Error { code: i32, message: String },
}

impl Reply {
  pub fn job(path: Option<String>) -> Self {
    match path {
      Some(path) => Reply::Job { path },
      None => Reply::NoJob,
    }
  }

  pub fn error(code: i32, message: impl Into<String>) -> Self {
    Reply::Error {
      code,
      message: message.into(),
    }
  }

  pub fn invalid_request(message: impl Into<String>) -> Self {
    Self::error(codes::INVALID_REQUEST, message)
  }

  pub fn method_not_found(kind: &str) -> Self {
    Self::error(codes::METHOD_NOT_FOUND, format!("Unknown message type: {}", kind))
  }

  pub fn missing_path(kind: MessageType) -> Self {
    Self::error(codes::INVALID_PARAMS, format!("'{}' requires a path", kind))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, Reply::Error { .. })
  }

  /// Turn an error reply into an [`IpcError::Rpc`].
  pub fn into_result(self) -> Result<Reply, IpcError> {
    match self {
      Reply::Error { code, message } => Err(IpcError::Rpc { code, message }),
      other => Ok(other),
    }
  }
}

// ============================================================================
// Framing
// ============================================================================

pub(crate) type FramedStream = Framed<UnixStream, LengthDelimitedCodec>;

pub(crate) fn framed(stream: UnixStream) -> FramedStream {
  let codec = LengthDelimitedCodec::builder()
    .max_frame_length(MAX_ENCODED_LEN as usize)
    .new_codec();
  Framed::new(stream, codec)
}

pub(crate) async fn send_frame<T: Serialize>(framed: &mut FramedStream, value: &T) -> Result<(), IpcError> {
  let bytes = codec::encode(value)?;
  framed.send(Bytes::from(bytes)).await?;
  Ok(())
}

/// Read and decode the next frame. `None` when the peer closed the stream.
pub(crate) async fn recv_frame<T: DeserializeOwned>(framed: &mut FramedStream) -> Result<Option<T>, IpcError> {
  match framed.next().await {
    Some(Ok(frame)) => Ok(Some(codec::decode(&frame)?)),
    Some(Err(e)) => Err(e.into()),
    None => Ok(None),
  }
}

/// Bind a listener at `path`, replacing a stale socket file.
pub(crate) async fn bind(path: &Path) -> Result<UnixListener, IpcError> {
  if path.exists() {
    tokio::fs::remove_file(path).await?;
  }

  if let Some(parent) = path.parent() {
    tokio::fs::create_dir_all(parent).await?;
  }

  Ok(UnixListener::bind(path)?)
}

pub(crate) async fn remove_socket(path: &Path) {
  if path.exists()
    && let Err(e) = tokio::fs::remove_file(path).await
  {
    tracing::warn!(path = %path.display(), error = %e, "Failed to remove socket file");
  }
}
