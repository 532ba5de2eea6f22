//! Error types for the parcel engine

use crate::parcel::ParcelId;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the parcel lifecycle engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// A staging parcel is already active, or an id is already taken
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The parcel does not exist in a deletable state
    #[error("Parcel not found: {0}")]
    NotFound(ParcelId),

    /// An external command exited with a nonzero status
    #[error("Command `{command}` failed with {}", describe_exit(.exit_code))]
    Command {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// An external command exceeded its deadline and was killed
    #[error("Command `{command}` timed out after {timeout:?}")]
    Timeout {
        command: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    /// An external command could not be started
    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared utility failure (sizing, atomic writes, durations)
    #[error(transparent)]
    Common(#[from] parcel_common::CommonError),

    /// Dataset configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A string is not a valid parcel id
    #[error("Invalid parcel id: '{0}'")]
    InvalidParcelId(String),

    /// The staged payload is missing or ambiguous
    #[error("Payload error for {id}: {reason}")]
    Payload { id: ParcelId, reason: String },

    /// metrics.csv could not be read or written
    #[error("Metrics ledger error: {0}")]
    Ledger(#[from] csv::Error),

    /// config.toml could not be parsed
    #[error("Failed to parse config.toml: {0}")]
    Toml(#[from] toml::de::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl EngineError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn payload(id: &ParcelId, reason: impl Into<String>) -> Self {
        Self::Payload {
            id: id.clone(),
            reason: reason.into(),
        }
    }

    /// Captured output attached to a failed command, if any
    pub fn command_output(&self) -> Option<(&str, &str)> {
        match self {
            Self::Command { stdout, stderr, .. } | Self::Timeout { stdout, stderr, .. } => {
                Some((stdout, stderr))
            },
            _ => None,
        }
    }

    /// Whether this error came from running an external command
    ///
    /// Producing-command failures of this kind fail the parcel rather than the tick.
    pub fn is_command_failure(&self) -> bool {
        matches!(
            self,
            Self::Command { .. } | Self::Timeout { .. } | Self::Spawn { .. }
        )
    }
}
