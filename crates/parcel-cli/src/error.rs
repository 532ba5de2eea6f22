//! Error types for the parcel CLI
//!
//! Messages are shown to the user as-is, so each one says what to do next.

use parcel_engine::EngineError;
use std::path::Path;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// No dataset on the command line and none in the environment
    #[error("No dataset given. Pass one or more dataset directories or set PARCEL_DATASETS.")]
    NoDatasets,

    /// Directory exists but has never been initialised
    #[error("Not a dataset: '{0}'. Run 'parcel init {0}' to create it.")]
    NotADataset(String),

    /// An environment setting could not be parsed
    #[error("Invalid value for {name}: {reason}. Check your environment or .env file.")]
    InvalidSetting { name: String, reason: String },

    /// Another parcel is staging or the id is taken
    #[error("{0}. Wait for the running export to finish, or pick another --parcel-id.")]
    Conflict(String),

    /// Nothing to delete or reprocess under that id
    #[error("{0}. Run 'parcel list <dataset>' to see existing parcels.")]
    ParcelNotFound(String),

    /// Any other engine failure
    #[error(transparent)]
    Engine(EngineError),

    /// File system operation failed
    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// JSON rendering failed
    #[error("Failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Tracing subscriber could not be installed
    #[error("Failed to initialise logging: {0}. Check the PARCEL_LOG_* variables.")]
    Logging(#[from] anyhow::Error),
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Conflict(_) => Self::Conflict(err.to_string()),
            EngineError::NotFound(_) => Self::ParcelNotFound(err.to_string()),
            other => Self::Engine(other),
        }
    }
}

impl CliError {
    pub fn invalid_setting(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidSetting {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn not_a_dataset(path: &Path) -> Self {
        Self::NotADataset(path.display().to_string())
    }
}
