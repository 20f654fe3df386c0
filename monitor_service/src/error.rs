// monitor_service/src/error.rs
use storage_service::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Duplicate task: {0}")]
    DuplicateTask(String),
    #[error("Monitor is already running")]
    AlreadyRunning,
    #[error("Unknown task: {0}")]
    UnknownTask(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Post error: {0}")]
    Post(String),
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
