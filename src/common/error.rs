use thiserror::Error;

/// Failures crossing the worker's seams: queue store, capture engine, blob store.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to start capture process: {0}")]
    Spawn(String),

    #[error("capture process error: {0}")]
    Capture(String),

    #[error("storage upload failed: {0}")]
    Upload(String),

    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error("unknown job status '{0}'")]
    UnknownStatus(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = RecorderError> = std::result::Result<T, E>;
