//! The seam between the dispatch core and whatever a worker does with a path.

use async_trait::async_trait;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
  #[error("IO error on {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// Work performed on a claimed path.
///
/// Failures are logged by the worker and the job is still reported finished;
/// the core never retries a job.
#[async_trait]
pub trait JobProcessor: Send + Sync {
  async fn process(&self, path: &str) -> Result<(), ProcessError>;
}

/// Default processor: confirms the path exists and logs its size.
#[derive(Debug, Clone, Copy, Default)]
pub struct InspectProcessor;

#[async_trait]
impl JobProcessor for InspectProcessor {
  async fn process(&self, path: &str) -> Result<(), ProcessError> {
    let metadata = tokio::fs::metadata(path).await.map_err(|source| ProcessError::Io {
      path: path.to_string(),
      source,
    })?;
    info!(path, bytes = metadata.len(), "Inspected file");
    Ok(())
  }
}
