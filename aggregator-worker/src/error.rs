use thiserror::Error;

/// Enumeration of errors related to running the worker pool.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("worker {name} did not exit cleanly: {error}")]
    JoinError {
        name: String,
        error: tokio::task::JoinError,
    },
    #[error("a worker pool needs at least one worker")]
    NoWorkersError,
}
