//! Error types shared across the parcel workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Error type for the shared utilities
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory traversal failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Unrecognized duration: '{0}'")]
    InvalidDuration(String),

    #[error("Atomic write to {path} failed: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
