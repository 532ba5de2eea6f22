//! Parcel CLI Library
//!
//! Command-line interface for keeping timestamped snapshots of datasets.
//!
//! # Overview
//!
//! - **Setup**: create dataset directories (`parcel init`)
//! - **Snapshots**: run the export command or ingest a file (`parcel export`, `parcel ingest`)
//! - **Scheduling**: one tick of ingest, export-if-due and retention (`parcel process`)
//! - **Retention**: drop old parcels beyond `keep` (`parcel clean`)
//! - **Status**: due/overdue flags and metric trends (`parcel report`)
//! - **Maintenance**: fill in metrics, inspect and delete parcels
//!   (`parcel reprocess-metrics`, `parcel list`, `parcel delete`)

pub mod commands;
pub mod config;
pub mod error;
pub mod gitignore;
pub mod output;

// Re-export commonly used types
pub use config::Settings;
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use output::OutputFormat;
use parcel_common::logging::{LogConfig, LogLevel, LogOutput};
use parcel_common::HumanDuration;
use parcel_engine::ParcelId;
use std::path::PathBuf;

/// Parcel - timestamped dataset snapshots
#[derive(Parser, Debug)]
#[command(name = "parcel")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
///
/// Commands taking `PATHS` fall back to `PARCEL_DATASETS` when none are given.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create dataset directories with a sample config.toml
    Init {
        /// Also write a .gitignore, run `git init` and enable commits
        #[arg(long)]
        git: bool,

        /// Dataset directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Run the export command once, whether due or not
    Export {
        /// Use this parcel id instead of the current time
        #[arg(short = 'p', long = "parcel-id")]
        parcel_id: Option<ParcelId>,

        paths: Vec<PathBuf>,
    },

    /// Turn an existing file or directory into a parcel
    Ingest {
        /// Use this parcel id instead of the configured time source
        #[arg(short = 'p', long = "parcel-id")]
        parcel_id: Option<ParcelId>,

        dataset: PathBuf,

        /// File or directory to move into the dataset
        path: PathBuf,
    },

    /// Ingest, export if due, apply retention and commit
    Process { paths: Vec<PathBuf> },

    /// Delete COMPLETE parcels beyond `keep`
    Clean { paths: Vec<PathBuf> },

    /// Show due/overdue status and metric trends
    Report {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Trend offset such as "7 days" (repeatable)
        #[arg(long = "offset")]
        offsets: Vec<HumanDuration>,

        paths: Vec<PathBuf>,
    },

    /// Record metrics missing from metrics.csv
    ReprocessMetrics {
        /// Only these parcels (repeatable); default is every COMPLETE parcel
        #[arg(short = 'p', long = "parcel-id")]
        parcel_ids: Vec<ParcelId>,

        paths: Vec<PathBuf>,
    },

    /// List parcels and their state
    List {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        dataset: PathBuf,
    },

    /// Delete a COMPLETE or FAILED parcel
    Delete { dataset: PathBuf, parcel_id: ParcelId },
}

/// Logging for a CLI run: warnings by default, debug with `--verbose`
///
/// `PARCEL_LOG_*` variables take precedence.
pub fn log_config(verbose: bool) -> Result<LogConfig> {
    let level = if verbose { LogLevel::Debug } else { LogLevel::Warn };
    LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("parcel-cli")
        .build()
        .merge_env()
        .map_err(|e| CliError::invalid_setting("PARCEL_LOG_*", e))
}
