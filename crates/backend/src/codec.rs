//! Compact binary encoding shared by the job store and the wire protocol.
//!
//! Everything that crosses a process or disk boundary goes through
//! [`encode`] and [`decode`] so both sides agree on one set of bincode
//! options: varint integers, a hard size limit and no trailing bytes.

use bincode::Options;
use serde::{Serialize, de::DeserializeOwned};

/// Upper bound for a single encoded value (job list blob or wire message).
pub const MAX_ENCODED_LEN: u64 = 64 * 1024 * 1024;

pub type CodecError = bincode::Error;

fn options() -> impl Options {
  bincode::DefaultOptions::new().with_limit(MAX_ENCODED_LEN)
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
  options().serialize(value)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
  options().deserialize(bytes)
}
