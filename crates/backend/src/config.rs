//! Configuration file for the daemon.
//!
//! Looked up at `--config` or `<config_dir>/config.toml`. Every field has a
//! default, so an absent file or an empty one is a valid configuration.
//!
//! ```toml
//! [daemon]
//! verbose = true
//! exit_on_drain = true
//!
//! [workers]
//! count = 8
//!
//! [store]
//! data_dir = "/var/lib/gatehouse"
//! compress = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dirs;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Failed to read config {path:?}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Invalid config {path:?}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("Invalid config: {0}")]
  Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub daemon: DaemonConfig,
  pub workers: WorkersConfig,
  pub store: StoreConfig,
}

/// Daemon lifecycle and logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
  /// Log every protocol message and job at `info`
  pub verbose: bool,
  /// Default log level when RUST_LOG is unset
  pub log_level: String,
  /// Log file rotation when running in the background: hourly, daily, never
  pub log_rotation: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub scheduler_socket: Option<PathBuf>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub control_socket: Option<PathBuf>,
  /// Stop the run once every enqueued job has been reported finished
  pub exit_on_drain: bool,
}

impl Default for DaemonConfig {
  fn default() -> Self {
    Self {
      verbose: false,
      log_level: "info".to_string(),
      log_rotation: "daily".to_string(),
      scheduler_socket: None,
      control_socket: None,
      exit_on_drain: false,
    }
  }
}

/// Worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
  /// Number of pikemen
  pub count: usize,
  /// First delay after an empty job reply
  pub backoff_initial_ms: u64,
  /// Ceiling for the doubling delay
  pub backoff_max_ms: u64,
  /// How long shutdown waits for workers before aborting them
  pub terminate_timeout_secs: u64,
}

impl Default for WorkersConfig {
  fn default() -> Self {
    Self {
      count: 4,
      backoff_initial_ms: 100,
      backoff_max_ms: 2_000,
      terminate_timeout_secs: 10,
    }
  }
}

/// Job database settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data_dir: Option<PathBuf>,
  /// zlib-compress the stored job list
  pub compress: bool,
}

impl Config {
  /// Load from `path`, or from the default location when `path` is `None`.
  ///
  /// A missing default file yields the defaults; a missing explicit file is
  /// an error.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let (path, explicit) = match path {
      Some(path) => (path.to_path_buf(), true),
      None => (Self::default_path(), false),
    };

    let content = match std::fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(Self::default());
      }
      Err(source) => return Err(ConfigError::Io { path, source }),
    };

    let config = Self::parse(&content).map_err(|source| ConfigError::Parse { path, source })?;
    config.validate()?;
    Ok(config)
  }

  pub fn default_path() -> PathBuf {
    dirs::default_config_dir().join(CONFIG_FILE_NAME)
  }

  pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
    toml::from_str(content)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.workers.count == 0 {
      return Err(ConfigError::Invalid("workers.count must be at least 1".to_string()));
    }
    if self.workers.backoff_initial_ms == 0 {
      return Err(ConfigError::Invalid(
        "workers.backoff_initial_ms must be at least 1".to_string(),
      ));
    }
    Ok(())
  }
}
