//! Domain types - the queue entries and their aggregate views
//!
//! These types are independent of persistence and IPC concerns. The store
//! decides how a [`JobList`] is laid out on disk; the protocol decides how a
//! path travels to a worker.

pub mod job;

pub use job::{Job, JobList, QueueStats};
