use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Batch rejected before commit; nothing from it was written.
    #[error("record from {comment_url:?} has no extracted link")]
    MalformedRecord { comment_url: String },

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("invalid settings: {0}")]
    Config(#[from] config::ConfigError),
}
