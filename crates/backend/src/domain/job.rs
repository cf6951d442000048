use serde::{Deserialize, Serialize};

/// A single queue entry.
///
/// `path` identifies the unit of work. Paths are not unique: enqueueing the
/// same path twice yields two independent jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
  pub processed: bool,
  pub path: String,
}

impl Job {
  pub fn new(path: impl Into<String>) -> Self {
    Self {
      processed: false,
      path: path.into(),
    }
  }
}

/// Jobs in enqueue order. This order is the FIFO claim order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobList {
  jobs: Vec<Job>,
}

impl JobList {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.jobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.jobs.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Job> {
    self.jobs.iter()
  }

  /// Push an unprocessed job at the tail.
  pub fn push(&mut self, path: impl Into<String>) {
    self.jobs.push(Job::new(path));
  }

  /// Mark the earliest unprocessed job as processed and return its path.
  ///
  /// Returns `None` without touching the list when every job is processed.
  pub fn claim_next(&mut self) -> Option<String> {
    let job = self.jobs.iter_mut().find(|job| !job.processed)?;
    job.processed = true;
    Some(job.path.clone())
  }

  pub fn pending(&self) -> usize {
    self.jobs.iter().filter(|job| !job.processed).count()
  }

  pub fn stats(&self) -> QueueStats {
    let pending = self.pending();
    QueueStats {
      total: self.jobs.len(),
      pending,
      processed: self.jobs.len() - pending,
    }
  }
}

impl From<Vec<Job>> for JobList {
  fn from(jobs: Vec<Job>) -> Self {
    Self { jobs }
  }
}

impl<'a> IntoIterator for &'a JobList {
  type Item = &'a Job;
  type IntoIter = std::slice::Iter<'a, Job>;

  fn into_iter(self) -> Self::IntoIter {
    self.jobs.iter()
  }
}

/// Counts over a [`JobList`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
  pub total: usize,
  pub pending: usize,
  pub processed: usize,
}
