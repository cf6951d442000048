pub mod codec;
pub mod config;
pub mod dirs;
pub mod domain;
pub mod ipc;
pub mod pool;
pub mod scheduler;
pub mod store;

mod daemon;
pub use daemon::{ControlServer, Daemon, DaemonError, RunSummary, RuntimeConfig, ShutdownTrigger};

#[cfg(test)]
mod __tests__;
