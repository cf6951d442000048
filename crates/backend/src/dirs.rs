use std::path::PathBuf;

/// Directory holding both endpoint sockets.
///
/// `XDG_RUNTIME_DIR` when set, otherwise a per-user directory under `/tmp`.
pub fn runtime_dir() -> PathBuf {
  if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
    PathBuf::from(runtime_dir)
  } else {
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/gatehouse-{}", uid))
  }
}

/// Get the default scheduler endpoint path
pub fn default_scheduler_socket() -> PathBuf {
  runtime_dir().join("gatehouse-scheduler.sock")
}

/// Get the default main-loop control endpoint path
pub fn default_control_socket() -> PathBuf {
  runtime_dir().join("gatehouse-control.sock")
}

/// Get the default directory for the job database
///
/// Respects the following environment variables (in order of precedence):
/// 1. GATEHOUSE_DATA_DIR - explicit data directory override
/// 2. XDG_DATA_HOME - standard XDG data home directory
/// 3. dirs::data_local_dir() - platform default
pub fn default_data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("GATEHOUSE_DATA_DIR") {
    return PathBuf::from(dir);
  }

  if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(xdg_data).join("gatehouse");
  }

  dirs::data_local_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("gatehouse")
}

/// Get the default config directory
///
/// Respects the following environment variables (in order of precedence):
/// 1. GATEHOUSE_CONFIG_DIR - explicit config directory override
/// 2. XDG_CONFIG_HOME - standard XDG config home directory
/// 3. dirs::config_dir() - platform default
pub fn default_config_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("GATEHOUSE_CONFIG_DIR") {
    return PathBuf::from(dir);
  }

  if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
    return PathBuf::from(xdg_config).join("gatehouse");
  }

  dirs::config_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("gatehouse")
}
