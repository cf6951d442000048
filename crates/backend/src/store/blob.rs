//! Key-value persistence behind the job store.
//!
//! [`BlobStore`] is the narrow get/put seam the queue needs. [`RedbStore`] is
//! the embedded implementation: one redb file under the data directory, one
//! table of opaque values. Values carry a one-byte tag so a store opened with
//! compression can still read values written without it, and the reverse.

use std::{
  io::{Read, Write},
  path::{Path, PathBuf},
};

use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};
use redb::{Database, TableDefinition, TableError};
use tracing::{debug, info};

use super::StoreError;

const BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");

const TAG_RAW: u8 = 0x00;
const TAG_ZLIB: u8 = 0x01;

/// Ordered key-value storage consumed by [`JobStore`](super::JobStore).
pub trait BlobStore: Send {
  /// Read the value stored under `key`, `None` if the key was never written.
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

  /// Atomically replace the value stored under `key`.
  fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}

/// redb-backed [`BlobStore`].
pub struct RedbStore {
  db: Database,
  path: PathBuf,
  compress: bool,
}

impl RedbStore {
  pub const FILE_NAME: &'static str = "jobs.redb";

  /// Open (or create) the store file inside `data_dir`.
  pub fn open(data_dir: &Path, compress: bool) -> Result<Self, StoreError> {
    std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Open {
      path: data_dir.to_path_buf(),
      message: e.to_string(),
    })?;

    let path = data_dir.join(Self::FILE_NAME);
    let db = Database::create(&path).map_err(|e| StoreError::Open {
      path: path.clone(),
      message: e.to_string(),
    })?;

    info!(path = %path.display(), compress, "Opened job database");
    Ok(Self { db, path, compress })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn pack(&self, value: &[u8]) -> Result<Vec<u8>, StoreError> {
    if !self.compress {
      let mut packed = Vec::with_capacity(value.len() + 1);
      packed.push(TAG_RAW);
      packed.extend_from_slice(value);
      return Ok(packed);
    }

    let mut encoder = ZlibEncoder::new(vec![TAG_ZLIB], Compression::default());
    encoder.write_all(value).map_err(|e| StoreError::Write(e.to_string()))?;
    encoder.finish().map_err(|e| StoreError::Write(e.to_string()))
  }
}

fn unpack(key: &str, stored: &[u8]) -> Result<Vec<u8>, StoreError> {
  match stored.split_first() {
    Some((&TAG_RAW, rest)) => Ok(rest.to_vec()),
    Some((&TAG_ZLIB, rest)) => {
      let mut out = Vec::new();
      ZlibDecoder::new(rest)
        .read_to_end(&mut out)
        .map_err(|e| StoreError::corrupt(key, e))?;
      Ok(out)
    }
    Some((tag, _)) => Err(StoreError::corrupt(key, format!("unknown value tag {tag:#04x}"))),
    None => Err(StoreError::corrupt(key, "empty value")),
  }
}

fn read_error(err: impl Into<redb::Error>) -> StoreError {
  StoreError::Read(err.into().to_string())
}

fn write_error(err: impl Into<redb::Error>) -> StoreError {
  StoreError::Write(err.into().to_string())
}

impl BlobStore for RedbStore {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let txn = self.db.begin_read().map_err(read_error)?;
    let table = match txn.open_table(BLOBS) {
      Ok(table) => table,
      Err(TableError::TableDoesNotExist(_)) => return Ok(None),
      Err(e) => return Err(read_error(e)),
    };

    let Some(guard) = table.get(key).map_err(read_error)? else {
      return Ok(None);
    };
    unpack(key, guard.value()).map(Some)
  }

  fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
    let packed = self.pack(value)?;

    let txn = self.db.begin_write().map_err(write_error)?;
    {
      let mut table = txn.open_table(BLOBS).map_err(write_error)?;
      table.insert(key, packed.as_slice()).map_err(write_error)?;
    }
    txn.commit().map_err(write_error)?;

    debug!(key, bytes = packed.len(), "Stored blob");
    Ok(())
  }
}
