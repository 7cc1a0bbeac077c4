//! Shared types for the CloudGather service
//!
//! This crate contains the task and config models, the control-plane request
//! and response types, cron validation, and small utilities used throughout
//! the service binary.

pub mod api;
pub mod config;
pub mod cron;
pub mod defaults;
pub mod remote;
pub mod utils;

pub use config::{ScheduleDescriptor, StubTaskConfig, SyncTaskConfig, TaskStatus};

/// Result type alias used at API boundaries that need a typed error.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds the core distinguishes, per the error handling design.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata store error: {0}")]
    Database(String),

    #[error("remote host error: {0}")]
    RemoteHost(String),

    #[error("task execution error: {0}")]
    TaskExecution(String),
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_imports() {
        // Smoke test: modules compile and re-exports resolve.
    }
}
