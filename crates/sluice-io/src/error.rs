use thiserror::Error;

/// Result type local to sluice-io.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} is closed")]
    Closed(String),

    #[error("malformed record at {location}: {reason}")]
    Malformed { location: String, reason: String },

    #[error(transparent)]
    Core(#[from] sluice_core::Error),
}
