//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function. Commands over
//! several datasets keep going after a per-dataset error and report it in
//! the returned [`Outcome`].

pub mod clean;
pub mod delete;
pub mod export;
pub mod ingest;
pub mod init;
pub mod list;
pub mod process;
pub mod report;
pub mod reprocess;

use crate::error::{CliError, Result};
use crate::output;
use parcel_engine::config::CONFIG_FILE;
use parcel_engine::Dataset;
use std::path::Path;
use tracing::error;

/// Whether a command finished cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Outcome {
    Success,
    /// An export failed or a dataset could not be processed
    Failure,
}

impl Outcome {
    pub fn is_failure(self) -> bool {
        self == Self::Failure
    }

    /// Failure if either side failed
    pub fn and(self, other: Outcome) -> Outcome {
        if self.is_failure() || other.is_failure() {
            Self::Failure
        } else {
            Self::Success
        }
    }
}

/// Open a dataset, pointing at `parcel init` when it was never created
pub fn open_dataset(path: &Path) -> Result<Dataset> {
    if !path.join(CONFIG_FILE).exists() {
        return Err(CliError::not_a_dataset(path));
    }
    Ok(Dataset::open(path)?)
}

/// Print and log a per-dataset error; the batch continues
pub(crate) fn report_error(path: &Path, err: &CliError) -> Outcome {
    error!(dataset = %path.display(), error = %err, "Dataset failed");
    output::failure(&format!("{}: {}", path.display(), err));
    Outcome::Failure
}
