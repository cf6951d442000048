//! Durable FIFO job queue.
//!
//! [`JobStore`] keeps the whole [`JobList`] as one encoded blob under
//! [`JOBS_KEY`]. Every operation is a full load-modify-save cycle, so callers
//! must serialize access themselves; in the daemon that is the scheduler
//! thread, which owns the store outright.

use std::{fmt::Display, path::PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  codec::{self, CodecError},
  domain::{JobList, QueueStats},
};

pub mod blob;

pub use blob::{BlobStore, RedbStore};

/// The single well-known key holding the encoded job list.
pub const JOBS_KEY: &str = "jobs_list";

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("Failed to open store at {path:?}: {message}")]
  Open { path: PathBuf, message: String },
  #[error("Corrupt data under key '{key}': {message}")]
  CorruptData { key: String, message: String },
  #[error("Store read failed: {0}")]
  Read(String),
  #[error("Store write failed: {0}")]
  Write(String),
  #[error("Failed to encode job list: {0}")]
  Encode(#[source] CodecError),
}

impl StoreError {
  pub(crate) fn corrupt(key: &str, message: impl Display) -> Self {
    Self::CorruptData {
      key: key.to_string(),
      message: message.to_string(),
    }
  }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Queue semantics over a single persisted blob.
pub struct JobStore {
  blobs: Box<dyn BlobStore>,
}

impl JobStore {
  /// Open the redb-backed store in `data_dir`.
  pub fn open(data_dir: impl Into<PathBuf>, compress: bool) -> Result<Self> {
    let data_dir = data_dir.into();
    let blobs = RedbStore::open(&data_dir, compress)?;
    Self::with_blob_store(Box::new(blobs))
  }

  /// Wrap an already opened blob store.
  ///
  /// Persists an empty list when none exists yet. An existing list is kept
  /// as is, including one that no longer decodes.
  pub fn with_blob_store(blobs: Box<dyn BlobStore>) -> Result<Self> {
    let store = Self { blobs };

    match store.blobs.get(JOBS_KEY)? {
      None => {
        info!("No persisted job list, initializing an empty queue");
        store.save(&JobList::new())?;
      }
      Some(bytes) => match codec::decode::<JobList>(&bytes) {
        Ok(list) => {
          let stats = list.stats();
          info!(
            total = stats.total,
            pending = stats.pending,
            "Loaded persisted job list"
          );
        }
        Err(e) => {
          warn!(error = %e, "Persisted job list does not decode; leaving it untouched");
        }
      },
    }

    Ok(store)
  }

  /// Read the current list. A missing blob reads as an empty list.
  pub fn load(&self) -> Result<JobList> {
    match self.blobs.get(JOBS_KEY)? {
      None => Ok(JobList::new()),
      Some(bytes) => codec::decode(&bytes).map_err(|e| StoreError::corrupt(JOBS_KEY, e)),
    }
  }

  pub fn save(&self, list: &JobList) -> Result<()> {
    let bytes = codec::encode(list).map_err(StoreError::Encode)?;
    self.blobs.put(JOBS_KEY, &bytes)
  }

  /// Enqueue `path` behind every job already in the list.
  pub fn append(&self, path: &str) -> Result<()> {
    let mut list = self.load()?;
    list.push(path);
    self.save(&list)?;
    debug!(path, total = list.len(), "Job appended");
    Ok(())
  }

  /// Claim the earliest unprocessed job, marking it processed.
  ///
  /// Nothing is written when the queue has no unprocessed job.
  pub fn claim_next(&self) -> Result<Option<String>> {
    let mut list = self.load()?;
    let Some(path) = list.claim_next() else {
      return Ok(None);
    };
    self.save(&list)?;
    debug!(path = %path, "Job claimed");
    Ok(Some(path))
  }

  pub fn stats(&self) -> Result<QueueStats> {
    Ok(self.load()?.stats())
  }

  /// Release the underlying store.
  pub fn close(self) {
    drop(self.blobs);
    info!("Job store closed");
  }
}
