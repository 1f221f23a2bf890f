use thiserror::Error;

pub type NotegrepResult<T> = Result<T, NotegrepError>;

/// Failures that escape the retrieval core or the benchmark harness.
///
/// Per-chunk embedding problems and per-query benchmark problems never show
/// up here; they are recorded as data on the batch or suite that owns them.
#[derive(Error, Debug)]
pub enum NotegrepError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("native vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<tokio::task::JoinError> for NotegrepError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
